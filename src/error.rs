//! Error types shared across the crate.

use std::time::Duration;

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {key}")]
    Missing { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by a data store backend.
///
/// These carry driver detail and are only ever logged; the query layer turns
/// them into sanitized [`QueryError`]s before anything leaves the crate.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unsupported column type {type_name} for column {column}")]
    UnsupportedColumn { column: String, type_name: String },

    #[error("Fixture has no rows for template {0}")]
    MissingFixture(String),
}

impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        DatabaseError::Pool(err.to_string())
    }
}

impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> Self {
        DatabaseError::Query(err.to_string())
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request to {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Authentication failed for {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("No response from reasoning engine within {0:?}")]
    Timeout(Duration),
}

/// Failures of the template query path.
///
/// Messages are safe to show to the reasoning engine: they never contain
/// driver text or the values of bound parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Template '{0}' is already registered")]
    DuplicateTemplate(String),

    #[error("Unknown query template '{0}'")]
    UnknownTemplate(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Data store is unavailable")]
    StoreUnavailable,
}

impl QueryError {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the chart spec builder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChartError {
    #[error("Unknown field '{field}' (available: {})", .available.join(", "))]
    UnknownField {
        field: String,
        available: Vec<String>,
    },

    #[error("Unsupported chart type '{0}' (expected bar, line, scatter, pie, funnel or auto)")]
    UnsupportedChartType(String),

    #[error("Result has no columns to plot")]
    NoColumns,
}

/// Faults that end a turn.
///
/// Everything recoverable is surfaced to the reasoning engine as an
/// observation instead; only these reach the caller of `Agent::handle`.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Reasoning engine fault: {0}")]
    ReasoningEngine(#[from] LlmError),

    #[error("Data store unavailable")]
    DataStoreUnavailable,

    #[error("Turn cancelled by caller")]
    Cancelled,
}

impl AgentError {
    /// Text suitable for the end user. Never includes internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            AgentError::ReasoningEngine(_) | AgentError::DataStoreUnavailable => {
                "The analytics service is temporarily unavailable. Please try again in a moment."
            }
            AgentError::Cancelled => "The request was cancelled.",
        }
    }
}
