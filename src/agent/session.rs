//! Per-session conversation state.
//!
//! Each session owns its memory behind its own mutex, so turns for one
//! session run one at a time while different sessions proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::agent::memory::ConversationMemory;

/// State held for one session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub memory: ConversationMemory,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    fn new(id: &str, max_turns: usize, max_chars: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            memory: ConversationMemory::new(max_turns, max_chars),
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

/// Maps session identifiers to their state.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    max_turns: usize,
    max_chars: usize,
}

impl SessionStore {
    /// Sessions created by this store get memory with these bounds.
    pub fn new(max_turns: usize, max_chars: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
            max_chars,
        }
    }

    /// Get the session, creating it with empty memory if needed.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
        // Fast path: check if session exists
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(session_id) {
                return Arc::clone(session);
            }
        }

        let mut sessions = self.sessions.write().await;
        // Double-check after acquiring write lock
        if let Some(session) = sessions.get(session_id) {
            return Arc::clone(session);
        }

        tracing::debug!(session = session_id, "Creating session");
        let session = Arc::new(Mutex::new(Session::new(
            session_id,
            self.max_turns,
            self.max_chars,
        )));
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        session
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Drop a session and its memory. Returns whether it existed.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove sessions idle for longer than `max_idle`.
    ///
    /// Sessions currently locked by a running turn are skipped.
    pub async fn prune_idle(&self, max_idle: std::time::Duration) -> usize {
        let Some(cutoff) = chrono::TimeDelta::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return 0;
        };

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(sess) => sess.last_active_at >= cutoff,
            Err(_) => true,
        });
        let count = before - sessions.len();

        if count > 0 {
            tracing::info!(
                "Pruned {} idle session(s) (idle > {}s)",
                count,
                max_idle.as_secs()
            );
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::memory::NewTurn;

    #[tokio::test]
    async fn test_get_or_create_session() {
        let store = SessionStore::new(10, 1_000);

        let session1 = store.get_or_create("a").await;
        let session2 = store.get_or_create("a").await;
        assert!(Arc::ptr_eq(&session1, &session2));

        let session3 = store.get_or_create("b").await;
        assert!(!Arc::ptr_eq(&session1, &session3));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_memory() {
        let store = SessionStore::new(10, 1_000);
        store
            .get_or_create("a")
            .await
            .lock()
            .await
            .memory
            .append(NewTurn::user("only in a"));

        let b = store.get_or_create("b").await;
        assert!(b.lock().await.memory.is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SessionStore::new(10, 1_000);
        store.get_or_create("a").await;
        assert!(store.remove("a").await);
        assert!(!store.remove("a").await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_prune_idle() {
        let store = SessionStore::new(10, 1_000);
        store.get_or_create("active").await;
        let stale = store.get_or_create("stale").await;
        stale.lock().await.last_active_at = Utc::now() - chrono::TimeDelta::days(10);

        let pruned = store
            .prune_idle(std::time::Duration::from_secs(86_400 * 7))
            .await;
        assert_eq!(pruned, 1);
        assert!(store.get("active").await.is_some());
        assert!(store.get("stale").await.is_none());
    }
}
