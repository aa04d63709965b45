//! Builds a chart spec from a stored query result.

use std::time::Instant;

use async_trait::async_trait;

use crate::charts::{self, AxisMapping};
use crate::query::QueryResult;
use crate::tools::context::ToolContext;
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_str};

pub const NAME: &str = "create_visualization";

pub struct CreateVisualizationTool;

#[async_trait]
impl Tool for CreateVisualizationTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Create a chart from a query result returned earlier in this conversation turn. \
         Chart types: bar, line, scatter, pie, funnel, or auto to pick one from the data. \
         Columns left out are detected automatically. The chart is shown to the user \
         separately; do not describe or embed it as an image."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "maxLength": 200,
                    "description": "Chart title"
                },
                "result_id": {
                    "type": "string",
                    "description": "Result to chart (defaults to the latest query result)"
                },
                "chart_type": {
                    "type": "string",
                    "description": "bar, line, scatter, pie, funnel or auto"
                },
                "x_column": {"type": "string", "description": "Column for the x axis or slice labels"},
                "y_column": {"type": "string", "description": "Column for the y axis or slice values"},
                "color_column": {"type": "string", "description": "Column that splits the data into series"}
            },
            "required": ["title"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();

        let title = optional_str(&params, "title")
            .ok_or_else(|| ToolError::InvalidArguments("missing 'title' parameter".to_string()))?;
        let result_id = optional_str(&params, "result_id");
        let result = stored_result(ctx, result_id)?;

        let mapping = AxisMapping {
            x: optional_str(&params, "x_column").map(str::to_string),
            y: optional_str(&params, "y_column").map(str::to_string),
            color: optional_str(&params, "color_column").map(str::to_string),
        };
        let chart_type = optional_str(&params, "chart_type").unwrap_or("auto");

        let spec = charts::build(result, chart_type, &mapping, title)?;
        let payload = serde_json::json!({
            "chart_type": spec.kind,
            "title": spec.title,
            "x": spec.x,
            "y": spec.y,
            "color": spec.color,
            "series": spec.series.len(),
            "data_points": spec.data_points,
            "template": spec.template,
        });

        tracing::info!(kind = %spec.kind, template = %spec.template, "Chart spec created");
        ctx.push_chart(spec);

        Ok(ToolOutput::success(payload, start.elapsed()))
    }
}

/// Resolve a stored result, explaining what exists when the lookup fails.
pub(crate) fn stored_result<'a>(
    ctx: &'a ToolContext,
    result_id: Option<&str>,
) -> Result<&'a QueryResult, ToolError> {
    ctx.result(result_id).ok_or_else(|| match result_id {
        Some(id) => ToolError::InvalidArguments(format!(
            "unknown result_id '{}' (available: {})",
            id,
            ctx.result_ids().join(", ")
        )),
        None => ToolError::InvalidArguments(
            "no query result available yet; call query_marketing_data first".to_string(),
        ),
    })
}
