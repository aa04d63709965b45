//! Steps taken while answering one user message.

use serde::{Deserialize, Serialize};

use crate::llm::ToolCall;
use crate::tools::{FailureKind, ToolResult};

/// What the loop did in one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    ToolCall(ToolCall),
    FinalAnswer(String),
    /// The engine produced output that was neither a tool call nor an answer.
    ParseFailure { raw: String, reason: String },
    /// The loop stopped because it ran out of iterations.
    IterationCap,
}

/// One iteration of the decide/act/observe loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStep {
    /// Zero-based iteration index.
    pub index: usize,
    pub action: StepAction,
    pub result: Option<ToolResult>,
    /// Text fed back to the engine for this step, already truncated.
    pub observation: Option<String>,
    pub continues: bool,
}

impl AgentStep {
    pub fn summary(&self) -> StepSummary {
        let (action, tool) = match &self.action {
            StepAction::ToolCall(call) => ("tool_call", Some(call.name.clone())),
            StepAction::FinalAnswer(_) => ("final_answer", None),
            StepAction::ParseFailure { .. } => ("parse_failure", None),
            StepAction::IterationCap => ("iteration_cap", None),
        };
        StepSummary {
            index: self.index,
            action: action.to_string(),
            tool,
            success: self.result.as_ref().map(|r| r.success),
            failure: self.result.as_ref().and_then(|r| r.failure_kind()),
        }
    }
}

/// Serializable view of a step, returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub index: usize,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}
