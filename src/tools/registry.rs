//! Name -> tool lookup and uniform invocation.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::Validator;

use crate::llm::{ToolCall, ToolDefinition};
use crate::tools::context::ToolContext;
use crate::tools::tool::{FailureKind, Tool, ToolError, ToolResult, ToolSchema};

/// A tool plus the validator compiled from its parameter schema.
struct Registered {
    tool: Arc<dyn Tool>,
    validator: Validator,
}

/// The set of tools the reasoning engine may call.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Registered>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Names are unique and the parameter schema must compile.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        let validator = jsonschema::draft202012::new(&tool.parameters_schema())
            .map_err(|e| ToolError::InvalidSchema {
                tool: name.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, Registered { tool, validator });
        Ok(())
    }

    /// Tool names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Published schemas, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|r| r.tool.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Definitions offered to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.schemas()
            .into_iter()
            .map(|s| ToolDefinition {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate and run `call`. Every outcome, including an unknown tool or
    /// malformed arguments, comes back as a `ToolResult`.
    pub async fn invoke(&self, call: &ToolCall, ctx: &mut ToolContext) -> ToolResult {
        let Some(entry) = self.tools.get(&call.name) else {
            tracing::warn!(tool = %call.name, "Model requested unknown tool");
            return ToolResult::failed(
                &call.name,
                FailureKind::UnknownTool,
                format!(
                    "No tool named '{}'. Available tools: {}",
                    call.name,
                    self.names().join(", ")
                ),
            );
        };

        if let Err(error) = entry.validator.validate(&call.arguments) {
            let path = error.instance_path().to_string();
            let message = if path.is_empty() {
                error.to_string()
            } else {
                format!("'{}': {}", path, error)
            };
            tracing::debug!(tool = %call.name, %message, "Rejected tool arguments");
            return ToolResult::failed(&call.name, FailureKind::InvalidArguments, message);
        }

        match entry.tool.execute(call.arguments.clone(), ctx).await {
            Ok(output) => {
                tracing::debug!(
                    tool = %call.name,
                    elapsed_ms = output.duration.as_millis() as u64,
                    "Tool succeeded"
                );
                ToolResult::ok(&call.name, output.result)
            }
            Err(err) => {
                let kind = err.kind();
                tracing::warn!(tool = %call.name, kind = %kind, error = %err, "Tool failed");
                ToolResult::failed(&call.name, kind, err.to_string())
            }
        }
    }
}
