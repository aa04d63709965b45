//! Bounded conversation history for one session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    /// Monotonically increasing within the session, never reused.
    pub position: u64,
    pub at: DateTime<Utc>,
    /// Pinned turns are evicted only after every unpinned one.
    pub pinned: bool,
    /// Tool that produced the turn, for tool turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// What to append; position and timestamp are assigned by the memory.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub role: TurnRole,
    pub content: String,
    pub tool: Option<String>,
    pub pinned: bool,
}

impl NewTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool: Some(name.into()),
            ..Self::new(TurnRole::Tool, content)
        }
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool: None,
            pinned: false,
        }
    }
}

/// Conversation history bounded by turn count and total content size.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
    max_turns: usize,
    max_chars: usize,
    chars: usize,
    next_position: u64,
}

impl ConversationMemory {
    pub fn new(max_turns: usize, max_chars: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(1),
            max_chars,
            chars: 0,
            next_position: 0,
        }
    }

    /// Append a turn, then evict until both bounds hold.
    ///
    /// The oldest unpinned turn goes first, then the oldest pinned one. The
    /// turn just appended is never evicted, so a single oversized turn can
    /// leave the character bound exceeded until the next append.
    pub fn append(&mut self, turn: NewTurn) -> u64 {
        let position = self.next_position;
        self.next_position += 1;

        self.chars += turn.content.chars().count();
        self.turns.push(ConversationTurn {
            role: turn.role,
            content: turn.content,
            position,
            at: Utc::now(),
            pinned: turn.pinned,
            tool: turn.tool,
        });

        while self.over_bound() {
            let Some(victim) = self.eviction_candidate() else {
                break;
            };
            let evicted = self.turns.remove(victim);
            self.chars -= evicted.content.chars().count();
            tracing::trace!(position = evicted.position, "Evicted conversation turn");
        }

        position
    }

    fn over_bound(&self) -> bool {
        self.turns.len() > self.max_turns || self.chars > self.max_chars
    }

    fn eviction_candidate(&self) -> Option<usize> {
        let newest = self.turns.len().checked_sub(1)?;
        let older = &self.turns[..newest];
        older
            .iter()
            .position(|t| !t.pinned)
            .or_else(|| (!older.is_empty()).then_some(0))
    }

    /// Pin the turn at `position`. Returns false if it is no longer held.
    pub fn pin(&mut self, position: u64) -> bool {
        match self.turns.iter_mut().find(|t| t.position == position) {
            Some(turn) => {
                turn.pinned = true;
                true
            }
            None => false,
        }
    }

    /// Copy of the held turns, oldest first.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Total characters of content held.
    pub fn content_chars(&self) -> usize {
        self.chars
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn positions(memory: &ConversationMemory) -> Vec<u64> {
        memory.turns().iter().map(|t| t.position).collect()
    }

    #[test]
    fn test_turn_bound_evicts_oldest_first() {
        let mut memory = ConversationMemory::new(3, 10_000);
        for i in 0..7 {
            memory.append(NewTurn::user(format!("message {}", i)));
            assert!(memory.len() <= 3);
        }

        assert_eq!(memory.len(), 3);
        assert_eq!(positions(&memory), vec![4, 5, 6]);
    }

    #[test]
    fn test_char_bound_evicts_until_within() {
        let mut memory = ConversationMemory::new(100, 10);
        memory.append(NewTurn::user("aaaa"));
        memory.append(NewTurn::assistant("bbbb"));
        memory.append(NewTurn::user("cccc"));

        assert_eq!(positions(&memory), vec![1, 2]);
        assert_eq!(memory.content_chars(), 8);
    }

    #[test]
    fn test_pinned_turns_survive_unpinned() {
        let mut memory = ConversationMemory::new(2, 10_000);
        memory.append(NewTurn::user("context").pinned());
        memory.append(NewTurn::assistant("one"));
        memory.append(NewTurn::assistant("two"));

        assert_eq!(positions(&memory), vec![0, 2]);
        assert!(memory.turns()[0].pinned);
    }

    #[test]
    fn test_newest_turn_is_never_evicted() {
        let mut memory = ConversationMemory::new(5, 4);
        memory.append(NewTurn::user("hi"));
        memory.append(NewTurn::tool("query_marketing_data", "a very long payload"));

        assert_eq!(memory.len(), 1);
        assert_eq!(memory.last().unwrap().tool.as_deref(), Some("query_marketing_data"));
    }

    #[test]
    fn test_pin_and_snapshot() {
        let mut memory = ConversationMemory::new(5, 1_000);
        let first = memory.append(NewTurn::user("hello"));
        assert!(memory.pin(first));
        assert!(!memory.pin(99));

        let snapshot = memory.snapshot();
        memory.append(NewTurn::assistant("later"));
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].pinned);
    }
}
