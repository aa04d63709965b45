//! Core agent logic.
//!
//! The agent owns:
//! - per-session bounded conversation memory ([`SessionStore`])
//! - the decide/act/observe loop ([`Orchestrator`])
//! - the inbound boundary ([`Agent::handle`]) used by the CLI and any
//!   surrounding service

mod memory;
mod orchestrator;
mod session;
mod trace;

pub use memory::{ConversationMemory, ConversationTurn, NewTurn, TurnRole};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use session::{Session, SessionStore};
pub use trace::{AgentStep, StepAction, StepSummary};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::charts::ChartSpec;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::llm::ReasoningEngine;
use crate::query::{QueryExecutor, QueryResult};
use crate::tools::{Filters, ToolRegistry};

/// What a handled message returns to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub answer: String,
    pub trace: Vec<StepSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    pub tables: Vec<QueryResult>,
}

/// Readiness as seen by a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub templates: usize,
    pub tools: usize,
    pub backend: String,
    pub store_ok: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.store_ok && self.templates > 0
    }
}

/// The analytics agent.
pub struct Agent {
    orchestrator: Orchestrator,
    tools: Arc<ToolRegistry>,
    executor: Arc<QueryExecutor>,
    sessions: SessionStore,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        tools: Arc<ToolRegistry>,
        executor: Arc<QueryExecutor>,
        config: AgentConfig,
        engine_timeout: Duration,
    ) -> Self {
        let orchestrator = Orchestrator::new(engine, Arc::clone(&tools))
            .with_max_iterations(config.max_iterations)
            .with_tool_output_max_chars(config.tool_output_max_chars)
            .with_engine_timeout(engine_timeout);
        Self {
            orchestrator,
            tools,
            executor,
            sessions: SessionStore::new(config.memory_max_turns, config.memory_max_chars),
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Answer one message in `session_id`.
    pub async fn handle(
        &self,
        session_id: &str,
        message: &str,
        filters: Option<Filters>,
    ) -> Result<AgentResponse, AgentError> {
        self.handle_with_cancel(session_id, message, filters, &CancellationToken::new())
            .await
    }

    /// Like [`handle`](Self::handle), abandoning the turn once `cancel` fires.
    pub async fn handle_with_cancel(
        &self,
        session_id: &str,
        message: &str,
        filters: Option<Filters>,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse, AgentError> {
        let filters = filters
            .unwrap_or_default()
            .with_default_dates(self.config.default_date_from, self.config.default_date_to);

        let session = self.sessions.get_or_create(session_id).await;
        let mut session = session.lock().await;
        session.touch();

        tracing::info!(session = %session_id, "Handling message");

        let outcome = self
            .orchestrator
            .run(&mut session.memory, message, filters, cancel)
            .await;

        match outcome {
            Ok(run) => Ok(AgentResponse {
                answer: run.answer,
                trace: run.steps.iter().map(AgentStep::summary).collect(),
                chart: run.chart,
                tables: run.tables,
            }),
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "Message not answered");
                Err(e)
            }
        }
    }

    /// Template count, tool count and a store ping.
    pub async fn readiness(&self) -> Readiness {
        let store = self.executor.store();
        let store_ok = match store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(backend = store.backend(), error = %e, "Store ping failed");
                false
            }
        };
        Readiness {
            templates: self.executor.registry().len(),
            tools: self.tools.len(),
            backend: store.backend().to_string(),
            store_ok,
        }
    }
}
