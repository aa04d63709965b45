//! Derived metrics and rankings over a stored query result.

use std::time::Instant;

use async_trait::async_trait;

use crate::insights::{self, InsightOptions};
use crate::tools::builtin::visualize::stored_result;
use crate::tools::context::ToolContext;
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_str};

pub const NAME: &str = "analyze_data_insights";

const MAX_TOP_N: u64 = 20;

pub struct AnalyzeDataInsightsTool;

#[async_trait]
impl Tool for AnalyzeDataInsightsTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Compute insights for a query result from this turn: revenue-to-spend and \
         funding ratios (reported as \"undefined\" when the denominator is zero), \
         top and bottom performers, column totals and averages, and the trend over time."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "result_id": {
                    "type": "string",
                    "description": "Result to analyze (defaults to the latest query result)"
                },
                "rank_by": {
                    "type": "string",
                    "description": "Numeric column, cost_efficiency_ratio or conversion_ratio (default: roas)"
                },
                "top_n": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_TOP_N,
                    "description": "How many top and bottom rows to report (default 3)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();

        let result = stored_result(ctx, optional_str(&params, "result_id"))?;

        let rank_by = optional_str(&params, "rank_by").map(str::to_string);
        if let Some(metric) = &rank_by {
            let available = insights::rankable_metrics(result);
            if !available.contains(metric) {
                return Err(ToolError::InvalidArguments(format!(
                    "cannot rank by '{}' (available: {})",
                    metric,
                    available.join(", ")
                )));
            }
        }

        let mut options = InsightOptions {
            rank_by,
            ..InsightOptions::default()
        };
        // Integral floats such as 3.0 also pass the schema.
        if let Some(n) = params.get("top_n").and_then(|v| v.as_f64()) {
            options.top_n = n as usize;
        }

        let insights = insights::analyze(result, &options);
        let payload = serde_json::to_value(&insights)
            .map_err(|e| ToolError::Execution(format!("could not encode insights: {}", e)))?;

        Ok(ToolOutput::success(payload, start.elapsed()))
    }
}
