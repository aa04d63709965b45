//! Tool system.
//!
//! Tools are the only way the reasoning engine touches data. Each one
//! declares a JSON Schema for its arguments; the registry validates every
//! call against it before the tool runs and turns every outcome, including
//! failures, into a [`ToolResult`] the engine can observe.

pub mod builtin;

mod context;
mod registry;
mod tool;

pub use context::{Filters, ToolContext};
pub use registry::ToolRegistry;
pub use tool::{FailureKind, Tool, ToolError, ToolFailure, ToolOutput, ToolResult, ToolSchema};
