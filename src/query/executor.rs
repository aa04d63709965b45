//! Runs validated template requests against the data store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::db::DataStore;
use crate::error::{DatabaseError, QueryError};
use crate::query::result::QueryResult;
use crate::query::template::TemplateRegistry;

/// A template identifier plus the parameter values supplied by a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub template: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl QueryRequest {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Binds validated parameters into registered templates and runs them.
pub struct QueryExecutor {
    registry: Arc<TemplateRegistry>,
    store: Arc<dyn DataStore>,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(registry: Arc<TemplateRegistry>, store: Arc<dyn DataStore>) -> Self {
        Self {
            registry,
            store,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Resolve, validate, bind and run a request.
    ///
    /// Requests that fail validation never reach the store.
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryResult, QueryError> {
        let template = self.registry.lookup(&request.template)?;
        let values = template.bind(&request.params)?;

        let start = Instant::now();
        let fetched = tokio::time::timeout(self.timeout, self.store.fetch(&template, &values)).await;

        let row_set = match fetched {
            Err(_) => {
                tracing::warn!(
                    template = template.id(),
                    timeout = ?self.timeout,
                    "Template query timed out"
                );
                return Err(QueryError::Execution(format!(
                    "query timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            Ok(Err(err)) => return Err(sanitize(template.id(), err)),
            Ok(Ok(rows)) => rows,
        };

        let result = template.shape(&values, row_set.columns, row_set.rows);
        tracing::debug!(
            template = template.id(),
            backend = self.store.backend(),
            rows = result.row_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Template query executed"
        );
        Ok(result)
    }
}

/// Log the driver error and return a message free of driver text.
fn sanitize(template: &str, err: DatabaseError) -> QueryError {
    tracing::warn!(template, error = %err, "Template query failed");
    match err {
        DatabaseError::Pool(_) => QueryError::StoreUnavailable,
        DatabaseError::Query(_) => {
            QueryError::Execution("the data store rejected the query".to_string())
        }
        DatabaseError::UnsupportedColumn { .. } => {
            QueryError::Execution("the query returned a column that cannot be read".to_string())
        }
        DatabaseError::MissingFixture(_) => {
            QueryError::Execution("no data is available for this template".to_string())
        }
    }
}
