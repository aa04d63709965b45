//! Tool trait and types.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ChartError, QueryError};
use crate::tools::context::ToolContext;

/// Error type for tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error("Tool '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Tool '{tool}' declares an invalid parameter schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

impl ToolError {
    /// Failure category reported back to the reasoning engine.
    pub fn kind(&self) -> FailureKind {
        match self {
            ToolError::InvalidArguments(_) => FailureKind::InvalidArguments,
            ToolError::Execution(_) => FailureKind::ExecutionError,
            ToolError::Query(QueryError::UnknownTemplate(_)) => FailureKind::UnknownTemplate,
            ToolError::Query(QueryError::InvalidParameter { .. }) => FailureKind::InvalidParameter,
            ToolError::Query(QueryError::StoreUnavailable) => FailureKind::StoreUnavailable,
            ToolError::Query(QueryError::Execution(_) | QueryError::DuplicateTemplate(_)) => {
                FailureKind::ExecutionError
            }
            ToolError::Chart(ChartError::UnknownField { .. }) => FailureKind::UnknownField,
            ToolError::Chart(ChartError::UnsupportedChartType(_)) => {
                FailureKind::UnsupportedChartType
            }
            ToolError::Chart(ChartError::NoColumns) => FailureKind::ExecutionError,
            ToolError::AlreadyRegistered(_) | ToolError::InvalidSchema { .. } => {
                FailureKind::ExecutionError
            }
        }
    }
}

/// Why a tool invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    InvalidArguments,
    UnknownTemplate,
    InvalidParameter,
    ExecutionError,
    StoreUnavailable,
    UnknownField,
    UnsupportedChartType,
}

impl FailureKind {
    /// Infrastructure faults end the turn; everything else is an observation
    /// the reasoning engine can recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::StoreUnavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::InvalidArguments => "invalid_arguments",
            FailureKind::UnknownTemplate => "unknown_template",
            FailureKind::InvalidParameter => "invalid_parameter",
            FailureKind::ExecutionError => "execution_error",
            FailureKind::StoreUnavailable => "store_unavailable",
            FailureKind::UnknownField => "unknown_field",
            FailureKind::UnsupportedChartType => "unsupported_chart_type",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one invocation. Always a value, never a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolResult {
    pub fn ok(tool: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(tool: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            success: false,
            payload: serde_json::Value::Null,
            error: Some(ToolFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_fatal(&self) -> bool {
        self.failure_kind().is_some_and(|k| k.is_fatal())
    }

    /// Text form fed back to the reasoning engine and kept in memory.
    pub fn observation(&self) -> String {
        match &self.error {
            Some(failure) => format!("Error ({}): {}", failure.kind, failure.message),
            None => self.payload.to_string(),
        }
    }
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The result data.
    pub result: serde_json::Value,
    /// Time taken.
    pub duration: Duration,
}

impl ToolOutput {
    /// Create a successful output with a JSON result.
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }
}

/// Definition of a tool's parameters using JSON Schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A capability the reasoning engine can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name.
    fn name(&self) -> &str;

    /// Get a description of what the tool does.
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with arguments that already passed schema validation.
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    /// Get the tool schema for LLM function calling.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Optional string argument; empty strings count as absent.
pub(crate) fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ToolError::from(QueryError::UnknownTemplate("X".into())).kind(),
            FailureKind::UnknownTemplate
        );
        assert_eq!(
            ToolError::from(QueryError::invalid("limit", "too big")).kind(),
            FailureKind::InvalidParameter
        );
        assert_eq!(
            ToolError::from(ChartError::UnsupportedChartType("radar".into())).kind(),
            FailureKind::UnsupportedChartType
        );
        assert!(ToolError::from(QueryError::StoreUnavailable).kind().is_fatal());
        assert!(!FailureKind::ExecutionError.is_fatal());
    }

    #[test]
    fn test_failed_result_observation() {
        let result = ToolResult::failed("forecast_performance", FailureKind::UnknownTool, "no such tool");
        assert!(!result.success);
        assert_eq!(result.observation(), "Error (unknown_tool): no such tool");
        assert_eq!(
            serde_json::to_value(&result).unwrap()["error"]["kind"],
            serde_json::json!("unknown_tool")
        );
    }
}
