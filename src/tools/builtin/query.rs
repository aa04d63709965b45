//! Runs a registered query template.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::query::catalog::{CHANNELS, MAX_LIMIT, SEGMENTS};
use crate::query::{QueryExecutor, QueryRequest};
use crate::tools::context::ToolContext;
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_str};

pub const NAME: &str = "query_marketing_data";

/// Executes an allowlisted template; never accepts query text.
pub struct QueryMarketingDataTool {
    executor: Arc<QueryExecutor>,
    description: String,
}

impl QueryMarketingDataTool {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        let templates: Vec<String> = executor
            .registry()
            .templates()
            .map(|t| format!("{} ({})", t.id(), t.description()))
            .collect();
        let description = format!(
            "Query marketing performance data using a predefined template. \
             Templates: {}. Dates default to the dashboard filter range; \
             segment and channel are optional filters.",
            templates.join("; ")
        );
        Self {
            executor,
            description,
        }
    }
}

#[async_trait]
impl Tool for QueryMarketingDataTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "template": {
                    "type": "string",
                    "description": "Template identifier, e.g. TOP_CAMPAIGNS"
                },
                "date_from": {
                    "type": "string",
                    "description": "Start date (YYYY-MM-DD), inclusive"
                },
                "date_to": {
                    "type": "string",
                    "description": "End date (YYYY-MM-DD), inclusive"
                },
                "segment": {
                    "type": "string",
                    "description": format!("Customer segment filter: {}", SEGMENTS.join(", "))
                },
                "channel": {
                    "type": "string",
                    "description": format!("Marketing channel filter: {}", CHANNELS.join(", "))
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_LIMIT,
                    "description": "Maximum rows, for templates that rank"
                }
            },
            "required": ["template"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();

        let template = optional_str(&params, "template")
            .ok_or_else(|| ToolError::InvalidArguments("missing 'template' parameter".to_string()))?;

        let filters = ctx.filters();
        let mut request = QueryRequest::new(template);

        let date_from = optional_str(&params, "date_from")
            .map(str::to_string)
            .or_else(|| filters.date_from.map(|d| d.to_string()));
        let date_to = optional_str(&params, "date_to")
            .map(str::to_string)
            .or_else(|| filters.date_to.map(|d| d.to_string()));
        let segment = optional_str(&params, "segment")
            .map(str::to_string)
            .or_else(|| filters.segment.clone());
        let channel = optional_str(&params, "channel")
            .map(str::to_string)
            .or_else(|| filters.channel.clone());

        for (name, value) in [
            ("date_from", date_from),
            ("date_to", date_to),
            ("segment", segment),
            ("channel", channel),
        ] {
            if let Some(value) = value {
                request = request.with_param(name, value);
            }
        }
        if let Some(limit) = params.get("limit").filter(|v| !v.is_null()) {
            request = request.with_param("limit", limit.clone());
        }

        let result = self.executor.execute(&request).await?;
        let result_id = ctx.store_result(result);
        let Some(result) = ctx.result(Some(&result_id)) else {
            return Err(ToolError::Execution("result was not retained".to_string()));
        };

        tracing::info!(
            template = %result.template,
            result_id = %result_id,
            rows = result.row_count(),
            "Query template executed"
        );

        Ok(ToolOutput::success(
            serde_json::json!({
                "result_id": result_id,
                "template": result.template,
                "row_count": result.row_count(),
                "columns": result.columns,
                "rows": result.rows,
            }),
            start.elapsed(),
        ))
    }
}
