//! End-to-end runs of the agent over the demo dataset with scripted engines.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use marketing_agent::agent::{Agent, TurnRole};
use marketing_agent::charts::ChartKind;
use marketing_agent::config::AgentConfig;
use marketing_agent::db::FixtureStore;
use marketing_agent::error::{AgentError, LlmError};
use marketing_agent::llm::{Decision, DecisionContext, ReasoningEngine, ToolCall};
use marketing_agent::query::catalog::builtin_registry;
use marketing_agent::query::{ParamValue, QueryExecutor, Value};
use marketing_agent::tools::builtin::register_builtin;
use marketing_agent::tools::{FailureKind, Filters, ToolRegistry};

/// Plays back decisions in order, answering "done" once they run out, and
/// records every context it was asked to decide on.
struct ScriptedEngine {
    script: Mutex<VecDeque<Result<Decision, LlmError>>>,
    seen: Mutex<Vec<DecisionContext>>,
}

impl ScriptedEngine {
    fn new(script: Vec<Result<Decision, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn decide(&self, ctx: &DecisionContext) -> Result<Decision, LlmError> {
        self.seen.lock().unwrap().push(ctx.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Decision::FinalAnswer("done".to_string())))
    }
}

/// Never answers; always asks for more data.
struct AdversarialEngine;

#[async_trait]
impl ReasoningEngine for AdversarialEngine {
    async fn decide(&self, ctx: &DecisionContext) -> Result<Decision, LlmError> {
        Ok(tool(
            &format!("call_{}", ctx.steps.len()),
            "query_marketing_data",
            json!({"template": "KPI_SUMMARY"}),
        ))
    }
}

/// Takes far longer than any test waits.
struct StalledEngine;

#[async_trait]
impl ReasoningEngine for StalledEngine {
    async fn decide(&self, _ctx: &DecisionContext) -> Result<Decision, LlmError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Decision::FinalAnswer("too late".to_string()))
    }
}

fn tool(id: &str, name: &str, args: serde_json::Value) -> Decision {
    Decision::ToolCall(ToolCall::new(id, name, args))
}

fn answer(text: &str) -> Result<Decision, LlmError> {
    Ok(Decision::FinalAnswer(text.to_string()))
}

fn agent_with(engine: Arc<dyn ReasoningEngine>, store: Arc<FixtureStore>) -> Agent {
    let executor = Arc::new(QueryExecutor::new(Arc::new(builtin_registry().unwrap()), store));
    let mut tools = ToolRegistry::new();
    register_builtin(&mut tools, Arc::clone(&executor)).unwrap();
    Agent::new(
        engine,
        Arc::new(tools),
        executor,
        AgentConfig::default(),
        Duration::from_secs(30),
    )
}

#[tokio::test]
async fn top_campaigns_flow_returns_table_chart_and_insights() {
    let store = Arc::new(FixtureStore::demo());
    let engine = ScriptedEngine::new(vec![
        Ok(tool(
            "call_1",
            "query_marketing_data",
            json!({"template": "TOP_CAMPAIGNS", "limit": 5}),
        )),
        Ok(tool(
            "call_2",
            "create_visualization",
            json!({"title": "Top campaigns by ROAS", "chart_type": "bar"}),
        )),
        Ok(tool("call_3", "analyze_data_insights", json!({"top_n": 2}))),
        answer("Email Win-back leads with a 5.0x ROAS."),
    ]);
    let agent = agent_with(engine.clone(), store.clone());

    let response = assert_ok!(agent.handle("s1", "What are our top 5 campaigns?", None).await);

    assert_eq!(response.answer, "Email Win-back leads with a 5.0x ROAS.");
    assert_eq!(response.trace.len(), 4);
    assert!(response.trace[..3].iter().all(|s| s.success == Some(true)));

    assert_eq!(response.tables.len(), 1);
    let campaigns: Vec<String> = response.tables[0]
        .rows
        .iter()
        .map(|r| r["campaign"].to_string())
        .collect();
    assert_eq!(
        campaigns,
        vec![
            "Email Win-back",
            "Auto Loan Retarget",
            "Brand Search Core",
            "Debt Consolidation Q3",
            "Premium Cross-sell",
        ]
    );

    let chart = response.chart.expect("chart");
    assert_eq!(chart.kind, ChartKind::Bar);
    assert_eq!(chart.x, "campaign");
    assert_eq!(chart.data_points, 5);

    assert_eq!(store.call_count(), 1);

    // The insight step saw the stored result.
    let seen = engine.seen.lock().unwrap();
    let observation = seen[3].steps[2].observation.clone().unwrap();
    assert!(observation.contains("\"ranked_by\":\"roas\""), "{}", observation);
}

#[tokio::test]
async fn adversarial_engine_stops_at_iteration_cap() {
    let store = Arc::new(FixtureStore::demo());
    let agent = agent_with(Arc::new(AdversarialEngine), store.clone());

    let response = assert_ok!(agent.handle("s1", "Keep digging", None).await);

    assert_eq!(response.trace.len(), 11);
    assert!(response.trace[..10].iter().all(|s| s.action == "tool_call"));
    assert_eq!(response.trace[10].action, "iteration_cap");
    assert!(response.answer.contains("limit of 10"));
    assert_eq!(store.call_count(), 10);

    let session = agent.sessions().get("s1").await.unwrap();
    let session = session.lock().await;
    let last = session.memory.last().unwrap();
    assert_eq!(last.role, TurnRole::Assistant);
    assert_eq!(last.content, response.answer);
}

#[tokio::test]
async fn unknown_tool_is_observed_and_loop_continues() {
    let engine = ScriptedEngine::new(vec![
        Ok(tool("call_1", "forecast_performance", json!({"months": 3}))),
        answer("Forecasting is not available; here is what I can tell you."),
    ]);
    let agent = agent_with(engine.clone(), Arc::new(FixtureStore::demo()));

    let response = assert_ok!(agent.handle("s1", "Forecast next quarter", None).await);

    assert_eq!(response.trace[0].tool.as_deref(), Some("forecast_performance"));
    assert_eq!(response.trace[0].failure, Some(FailureKind::UnknownTool));
    assert_eq!(response.trace[1].action, "final_answer");

    let seen = engine.seen.lock().unwrap();
    let observation = seen[1].steps[0].observation.clone().unwrap();
    assert!(observation.starts_with("Error (unknown_tool)"));
    assert!(observation.contains("query_marketing_data"));
}

#[tokio::test]
async fn parse_failure_gets_corrective_observation() {
    let engine = ScriptedEngine::new(vec![
        Ok(Decision::Unparseable {
            raw: "Action: query(".to_string(),
            reason: "unterminated call".to_string(),
        }),
        answer("Recovered."),
    ]);
    let agent = agent_with(engine.clone(), Arc::new(FixtureStore::demo()));

    let response = assert_ok!(agent.handle("s1", "hi", None).await);

    assert_eq!(response.answer, "Recovered.");
    assert_eq!(response.trace[0].action, "parse_failure");
    let seen = engine.seen.lock().unwrap();
    assert_eq!(seen[1].remaining_iterations, 9);
}

#[tokio::test]
async fn engine_fault_keeps_user_turn_and_hides_detail() {
    let engine = ScriptedEngine::new(vec![Err(LlmError::RequestFailed {
        provider: "openai".to_string(),
        reason: "connection reset by 10.0.0.7".to_string(),
    })]);
    let agent = agent_with(engine, Arc::new(FixtureStore::demo()));

    let err = agent.handle("s1", "Channel performance?", None).await.unwrap_err();

    assert!(matches!(err, AgentError::ReasoningEngine(_)));
    assert!(!err.user_message().contains("10.0.0.7"));

    let session = agent.sessions().get("s1").await.unwrap();
    let session = session.lock().await;
    assert_eq!(session.memory.len(), 1);
    assert_eq!(session.memory.last().unwrap().role, TurnRole::User);
}

#[tokio::test]
async fn unavailable_store_ends_the_turn() {
    let engine = ScriptedEngine::new(vec![Ok(tool(
        "call_1",
        "query_marketing_data",
        json!({"template": "KPI_SUMMARY"}),
    ))]);
    let agent = agent_with(engine.clone(), Arc::new(FixtureStore::demo().unavailable()));

    let err = agent.handle("s1", "KPIs?", None).await.unwrap_err();

    assert!(matches!(err, AgentError::DataStoreUnavailable));
    assert_eq!(engine.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_in_flight_engine_call() {
    let store = Arc::new(FixtureStore::demo());
    let agent = agent_with(Arc::new(StalledEngine), store.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = agent
        .handle_with_cancel("s1", "Slow question", None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn request_filters_fill_query_arguments() {
    let store = Arc::new(FixtureStore::demo());
    let engine = ScriptedEngine::new(vec![
        Ok(tool(
            "call_1",
            "query_marketing_data",
            json!({"template": "CHANNEL_PERFORMANCE"}),
        )),
        answer("Search leads on volume."),
    ]);
    let agent = agent_with(engine.clone(), store.clone());
    let filters = Filters::new().with_segment("SME");

    assert_ok!(agent.handle("s1", "Channels for SME?", Some(filters)).await);

    let call = &store.calls()[0];
    let defaults = AgentConfig::default();
    assert_eq!(call.params[0], ParamValue::Date(defaults.default_date_from));
    assert_eq!(call.params[1], ParamValue::Date(defaults.default_date_to));
    assert_eq!(call.params[2], ParamValue::Text("SME".to_string()));
    assert_eq!(call.params[3], ParamValue::Null);

    let seen = engine.seen.lock().unwrap();
    assert_eq!(seen[0].filters.segment.as_deref(), Some("SME"));
}

#[tokio::test]
async fn memory_carries_across_messages() {
    let engine = ScriptedEngine::new(vec![answer("Spend was 10,900."), answer("ROAS was 3.0.")]);
    let agent = agent_with(engine.clone(), Arc::new(FixtureStore::demo()));

    assert_ok!(agent.handle("s1", "Total spend?", None).await);
    assert_ok!(agent.handle("s1", "And ROAS?", None).await);
    assert_ok!(agent.handle("s2", "Hello", None).await);

    let seen = engine.seen.lock().unwrap();
    let contents: Vec<&str> = seen[1].history.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["Total spend?", "Spend was 10,900.", "And ROAS?"]);
    assert_eq!(seen[2].history.len(), 1);
    assert_eq!(agent.sessions().len().await, 2);
}

#[tokio::test]
async fn readiness_reports_templates_and_store() {
    let ready = agent_with(ScriptedEngine::new(vec![]), Arc::new(FixtureStore::demo()))
        .readiness()
        .await;
    assert!(ready.is_ready());
    assert_eq!(ready.templates, 5);
    assert_eq!(ready.tools, 3);
    assert_eq!(ready.backend, "fixture");

    let down = agent_with(
        ScriptedEngine::new(vec![]),
        Arc::new(FixtureStore::demo().unavailable()),
    )
    .readiness()
    .await;
    assert!(!down.is_ready());
}

#[tokio::test]
async fn zero_spend_channel_has_undefined_ratio() {
    let engine = ScriptedEngine::new(vec![
        Ok(tool(
            "call_1",
            "query_marketing_data",
            json!({"template": "CHANNEL_PERFORMANCE"}),
        )),
        Ok(tool("call_2", "analyze_data_insights", json!({}))),
        answer("Direct has no spend."),
    ]);
    let agent = agent_with(engine.clone(), Arc::new(FixtureStore::demo()));

    let response = assert_ok!(agent.handle("s1", "Which channel is most efficient?", None).await);

    let direct = response.tables[0]
        .rows
        .iter()
        .find(|r| r["channel"] == Value::from("Direct"))
        .unwrap();
    assert_eq!(direct["roas"], Value::Null);

    let seen = engine.seen.lock().unwrap();
    let insights: serde_json::Value =
        serde_json::from_str(seen[2].steps[1].observation.as_deref().unwrap()).unwrap();
    let direct_ratios = insights["rows"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["label"] == json!("Direct"))
        .unwrap();
    assert_eq!(direct_ratios["cost_efficiency_ratio"], json!("undefined"));
}
