//! Allowlisted query surface.
//!
//! Templates are the only path from a tool call to the data store:
//! - `template`: declarations, parameter validation, the registry
//! - `catalog`: the built-in marketing templates
//! - `executor`: validation + bound, read-only execution
//! - `result`: tabular results

pub mod catalog;
mod executor;
mod result;
mod template;

pub use executor::{QueryExecutor, QueryRequest};
pub use result::{QueryResult, Row, Value};
pub use template::{ParamKind, ParamSpec, ParamValue, QueryTemplate, SortKey, TemplateInfo, TemplateRegistry};
