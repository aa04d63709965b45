//! Read-only data store abstraction.
//!
//! The only way to reach a store is through a registered [`QueryTemplate`]
//! plus values bound by [`QueryTemplate::bind`]; no method accepts SQL text.

mod fixture;
mod postgres;

pub use fixture::{FixtureCall, FixtureStore};
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::query::{ParamValue, QueryTemplate, Row};

/// Columns and rows as returned by a backend, before result shaping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Backend that can run a registered template.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Run `template` with `params` bound positionally, in a read-only
    /// context. Any connection acquired must be released before returning.
    async fn fetch(
        &self,
        template: &QueryTemplate,
        params: &[ParamValue],
    ) -> Result<RowSet, DatabaseError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), DatabaseError>;

    /// Short backend name for logs.
    fn backend(&self) -> &str;
}
