//! Marketing analytics agent.
//!
//! A reasoning loop that answers natural-language questions about marketing
//! performance by calling a small set of tools over an allowlisted, read-only
//! query surface.

pub mod agent;
pub mod charts;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod insights;
pub mod llm;
pub mod query;
pub mod tools;
