//! Built-in tools that come with the agent.

mod insights;
mod query;
mod visualize;

pub use insights::AnalyzeDataInsightsTool;
pub use query::QueryMarketingDataTool;
pub use visualize::CreateVisualizationTool;

use std::sync::Arc;

use crate::query::QueryExecutor;
use crate::tools::{ToolError, ToolRegistry};

pub const QUERY_MARKETING_DATA: &str = query::NAME;
pub const CREATE_VISUALIZATION: &str = visualize::NAME;
pub const ANALYZE_DATA_INSIGHTS: &str = insights::NAME;

/// Register the query, visualization and insight tools.
pub fn register_builtin(
    registry: &mut ToolRegistry,
    executor: Arc<QueryExecutor>,
) -> Result<(), ToolError> {
    registry.register(Arc::new(QueryMarketingDataTool::new(executor)))?;
    registry.register(Arc::new(CreateVisualizationTool))?;
    registry.register(Arc::new(AnalyzeDataInsightsTool))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FixtureStore;
    use crate::llm::ToolCall;
    use crate::query::catalog::builtin_registry;
    use crate::tools::context::{Filters, ToolContext};
    use crate::tools::tool::FailureKind;
    use chrono::NaiveDate;
    use serde_json::json;

    fn setup(store: FixtureStore) -> (ToolRegistry, Arc<FixtureStore>) {
        let store = Arc::new(store);
        let executor = Arc::new(QueryExecutor::new(
            Arc::new(builtin_registry().unwrap()),
            store.clone(),
        ));
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry, executor).unwrap();
        (registry, store)
    }

    fn context() -> ToolContext {
        ToolContext::new(Filters::new().with_dates(
            NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 18).unwrap(),
        ))
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new("call_1", name, args)
    }

    #[test]
    fn test_definitions_sorted() {
        let (registry, _) = setup(FixtureStore::demo());
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![ANALYZE_DATA_INSIGHTS, CREATE_VISUALIZATION, QUERY_MARKETING_DATA]
        );
    }

    #[tokio::test]
    async fn test_query_uses_filter_dates_and_stores_result() {
        let (registry, store) = setup(FixtureStore::demo());
        let mut ctx = context();

        let result = registry
            .invoke(
                &call(QUERY_MARKETING_DATA, json!({"template": "TOP_CAMPAIGNS", "limit": 3})),
                &mut ctx,
            )
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.payload["result_id"], json!("result_1"));
        assert_eq!(result.payload["row_count"], json!(3));
        assert_eq!(result.payload["rows"][0]["campaign"], json!("Email Win-back"));

        let recorded = &store.calls()[0];
        assert_eq!(
            recorded.params[0],
            crate::query::ParamValue::Date(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap())
        );
    }

    #[tokio::test]
    async fn test_query_failures_map_to_kinds() {
        let (registry, store) = setup(FixtureStore::demo());
        let mut ctx = context();

        let cases = [
            (json!({"template": "DROP_TABLES"}), FailureKind::UnknownTemplate),
            (json!({"template": "KPI_SUMMARY", "limit": 5}), FailureKind::InvalidParameter),
            (json!({"template": "KPI_SUMMARY", "date_from": "soon"}), FailureKind::InvalidParameter),
            (json!({"template": "KPI_SUMMARY", "segment": "Gold"}), FailureKind::InvalidParameter),
            (json!({"template": "KPI_SUMMARY", "sql": "SELECT 1"}), FailureKind::InvalidArguments),
            (json!({}), FailureKind::InvalidArguments),
        ];
        for (args, kind) in cases {
            let result = registry.invoke(&call(QUERY_MARKETING_DATA, args.clone()), &mut ctx).await;
            assert_eq!(result.failure_kind(), Some(kind), "for {}", args);
        }
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_model_arguments_are_canonicalized() {
        let (registry, store) = setup(FixtureStore::demo());
        let mut ctx = context();

        let result = registry
            .invoke(
                &call(
                    QUERY_MARKETING_DATA,
                    json!({"template": "TOP_CAMPAIGNS", "segment": "sme", "limit": 2.0}),
                ),
                &mut ctx,
            )
            .await;

        assert!(result.success, "{:?}", result.error);
        let recorded = &store.calls()[0];
        assert_eq!(recorded.params[2], crate::query::ParamValue::Text("SME".to_string()));
        assert_eq!(recorded.params[4], crate::query::ParamValue::Integer(2));
    }

    #[tokio::test]
    async fn test_unavailable_store_is_fatal() {
        let (registry, _) = setup(FixtureStore::demo().unavailable());
        let mut ctx = context();
        let result = registry
            .invoke(&call(QUERY_MARKETING_DATA, json!({"template": "KPI_SUMMARY"})), &mut ctx)
            .await;
        assert!(result.is_fatal());
    }

    #[tokio::test]
    async fn test_visualization_requires_a_result() {
        let (registry, _) = setup(FixtureStore::demo());
        let mut ctx = context();
        let result = registry
            .invoke(&call(CREATE_VISUALIZATION, json!({"title": "Spend"})), &mut ctx)
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::InvalidArguments));
    }

    #[tokio::test]
    async fn test_query_then_chart_then_insights() {
        let (registry, _) = setup(FixtureStore::demo());
        let mut ctx = context();

        registry
            .invoke(&call(QUERY_MARKETING_DATA, json!({"template": "CHANNEL_PERFORMANCE"})), &mut ctx)
            .await;

        let bad_field = registry
            .invoke(
                &call(CREATE_VISUALIZATION, json!({"title": "Spend", "y_column": "profit"})),
                &mut ctx,
            )
            .await;
        assert_eq!(bad_field.failure_kind(), Some(FailureKind::UnknownField));

        let bad_kind = registry
            .invoke(
                &call(CREATE_VISUALIZATION, json!({"title": "Spend", "chart_type": "heatmap"})),
                &mut ctx,
            )
            .await;
        assert_eq!(bad_kind.failure_kind(), Some(FailureKind::UnsupportedChartType));

        let chart = registry
            .invoke(
                &call(
                    CREATE_VISUALIZATION,
                    json!({"title": "Spend by channel", "chart_type": "bar", "x_column": "channel", "y_column": "marketing_spend"}),
                ),
                &mut ctx,
            )
            .await;
        assert!(chart.success);
        assert_eq!(ctx.latest_chart().unwrap().title, "Spend by channel");

        let insights = registry
            .invoke(&call(ANALYZE_DATA_INSIGHTS, json!({"top_n": 2})), &mut ctx)
            .await;
        assert!(insights.success);
        assert_eq!(insights.payload["ranked_by"], json!("roas"));
        assert_eq!(insights.payload["unranked"], json!(1));
        assert_eq!(insights.payload["top"][0]["label"], json!("Email"));

        let bad_metric = registry
            .invoke(&call(ANALYZE_DATA_INSIGHTS, json!({"rank_by": "vibes"})), &mut ctx)
            .await;
        assert_eq!(bad_metric.failure_kind(), Some(FailureKind::InvalidArguments));
    }
}
