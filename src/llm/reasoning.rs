//! Turns the conversation and the running trace into the next decision.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::agent::{AgentStep, ConversationTurn, StepAction, TurnRole};
use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, ToolCall, ToolCompletionRequest, ToolDefinition,
};
use crate::tools::Filters;

/// What the engine wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    ToolCall(ToolCall),
    FinalAnswer(String),
    /// Output that is neither a usable tool call nor an answer.
    Unparseable { raw: String, reason: String },
}

/// Everything the engine sees when deciding.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    /// Session history up to and including the current user message.
    pub history: Vec<ConversationTurn>,
    /// Steps already taken for the current message.
    pub steps: Vec<AgentStep>,
    pub tools: Vec<ToolDefinition>,
    pub filters: Filters,
    pub remaining_iterations: usize,
}

/// Chooses the next action. Implemented by the LLM-backed [`Reasoning`] and
/// by scripted engines in tests.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn decide(&self, ctx: &DecisionContext) -> Result<Decision, LlmError>;
}

/// Text-mode action some models emit instead of a native tool call.
#[derive(Debug, Deserialize)]
struct TextAction {
    action: String,
    #[serde(default)]
    action_input: serde_json::Value,
}

const FINAL_ANSWER_ACTION: &str = "Final Answer";

/// LLM-backed reasoning engine.
pub struct Reasoning {
    llm: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: u32,
}

impl Reasoning {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            temperature: 0.1,
            max_tokens: 2048,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_messages(&self, ctx: &DecisionContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(system_prompt(ctx))];

        for turn in &ctx.history {
            messages.push(match turn.role {
                TurnRole::User => ChatMessage::user(&turn.content),
                TurnRole::Assistant => ChatMessage::assistant(&turn.content),
                // Earlier tool calls have no matching request id any more.
                TurnRole::Tool => ChatMessage::assistant(format!(
                    "[{} returned] {}",
                    turn.tool.as_deref().unwrap_or("tool"),
                    turn.content
                )),
            });
        }

        for step in &ctx.steps {
            let observation = step.observation.clone().unwrap_or_default();
            match &step.action {
                StepAction::ToolCall(call) => {
                    messages.push(ChatMessage::assistant_with_tool_calls("", vec![call.clone()]));
                    messages.push(ChatMessage::tool_result(&call.id, &call.name, observation));
                }
                StepAction::ParseFailure { raw, .. } => {
                    messages.push(ChatMessage::assistant(raw));
                    messages.push(ChatMessage::user(observation));
                }
                StepAction::FinalAnswer(_) | StepAction::IterationCap => {}
            }
        }

        messages
    }
}

#[async_trait]
impl ReasoningEngine for Reasoning {
    async fn decide(&self, ctx: &DecisionContext) -> Result<Decision, LlmError> {
        let messages = self.build_messages(ctx);

        if ctx.tools.is_empty() {
            let request = CompletionRequest::new(messages)
                .with_max_tokens(self.max_tokens)
                .with_temperature(self.temperature);
            let response = self.llm.complete(request).await?;
            return Ok(parse_text(&response.content));
        }

        let request = ToolCompletionRequest::new(messages, ctx.tools.clone())
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .with_tool_choice("auto");
        let response = self.llm.complete_with_tools(request).await?;

        tracing::debug!(
            model = self.llm.model_name(),
            tool_calls = response.tool_calls.len(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Reasoning engine responded"
        );

        let mut calls = response.tool_calls.into_iter();
        if let Some(call) = calls.next() {
            let dropped = calls.count();
            if dropped > 0 {
                tracing::debug!(dropped, "Ignoring extra tool calls; one runs per step");
            }
            return Ok(decide_tool_call(call));
        }

        Ok(parse_text(response.content.as_deref().unwrap_or_default()))
    }
}

fn decide_tool_call(mut call: ToolCall) -> Decision {
    if let serde_json::Value::String(raw) = &call.arguments {
        return Decision::Unparseable {
            raw: raw.clone(),
            reason: format!("arguments for '{}' are not valid JSON", call.name),
        };
    }
    if call.id.is_empty() {
        call.id = new_call_id();
    }
    Decision::ToolCall(call)
}

/// Interpret a text-only response.
fn parse_text(content: &str) -> Decision {
    let cleaned = clean_response(content);
    if cleaned.is_empty() {
        return Decision::Unparseable {
            raw: content.to_string(),
            reason: "the response was empty".to_string(),
        };
    }

    if let Some(action) = extract_json(&cleaned).and_then(|j| serde_json::from_str::<TextAction>(j).ok()) {
        if action.action == FINAL_ANSWER_ACTION {
            return match action.action_input {
                serde_json::Value::String(answer) if !answer.trim().is_empty() => {
                    Decision::FinalAnswer(clean_response(&answer))
                }
                other => Decision::Unparseable {
                    raw: cleaned,
                    reason: format!("final answer must be text, got {}", other),
                },
            };
        }
        return Decision::ToolCall(ToolCall::new(new_call_id(), action.action, action.action_input));
    }

    if cleaned.trim_start().starts_with("Action:") {
        return Decision::Unparseable {
            raw: cleaned,
            reason: "the action could not be read; call a tool or give a final answer".to_string(),
        };
    }

    Decision::FinalAnswer(cleaned)
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn system_prompt(ctx: &DecisionContext) -> String {
    let filters = &ctx.filters;
    let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "not set".to_string());
    let text = |s: &Option<String>| s.clone().unwrap_or_else(|| "all".to_string());

    format!(
        r#"You are a senior financial services marketing analyst. You help marketing leaders understand campaign performance, customer acquisition and loan funding.

You have no data of your own. Every figure you report must come from a tool result in this conversation.

## Workflow
1. Fetch data with query_marketing_data, choosing the template that fits the question.
2. If the user asks for a chart, trend, comparison or anything visual, call create_visualization on that result.
3. Call analyze_data_insights before answering, then give a short answer focused on business impact.

Do not repeat a tool call with the same arguments. If a tool returns an error, fix the arguments or pick another template.

## Charts
Never write images, image markdown or base64 data. Charts are displayed from create_visualization; describe the findings in text only.

## Current filters
- Date range: {} to {}
- Segment: {}
- Channel: {}

You have {} tool calls left for this question."#,
        date(filters.date_from),
        date(filters.date_to),
        text(&filters.segment),
        text(&filters.channel),
        ctx.remaining_iterations,
    )
}

/// Extract JSON from text that might contain other content.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        Some(&text[start..=end])
    } else {
        None
    }
}

static MARKDOWN_IMAGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").ok());
static INLINE_IMAGE_DATA: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=]+").ok());

/// Strip thinking blocks and inline image payloads from model output.
pub fn clean_response(text: &str) -> String {
    let mut text = strip_thinking_tags(text);
    for pattern in [&*MARKDOWN_IMAGE, &*INLINE_IMAGE_DATA].into_iter().flatten() {
        text = pattern.replace_all(&text, "").into_owned();
    }
    collapse_blank_lines(text.trim())
}

/// Strip `<thinking>...</thinking>` blocks from LLM output.
fn strip_thinking_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut remaining = text;

    while let Some(start) = remaining.find("<thinking>") {
        result.push_str(&remaining[..start]);

        if let Some(end_offset) = remaining[start..].find("</thinking>") {
            let end = start + end_offset + "</thinking>".len();
            remaining = &remaining[end..];
        } else {
            // Unclosed tag: drop the rest.
            remaining = "";
            break;
        }
    }

    result.push_str(remaining);
    collapse_blank_lines(result.trim())
}

fn collapse_blank_lines(text: &str) -> String {
    let mut cleaned = text.to_string();
    while cleaned.contains("\n\n\n") {
        cleaned = cleaned.replace("\n\n\n", "\n\n");
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ConversationMemory, NewTurn};
    use crate::llm::{CompletionResponse, FinishReason, Role, ToolCompletionResponse};
    use crate::tools::{FailureKind, ToolResult};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Provider returning one canned response and recording the request.
    struct CannedProvider {
        response: ToolCompletionResponse,
        seen: Mutex<Vec<ToolCompletionRequest>>,
    }

    impl CannedProvider {
        fn new(content: Option<&str>, tool_calls: Vec<ToolCall>) -> Self {
            Self {
                response: ToolCompletionResponse {
                    content: content.map(str::to_string),
                    tool_calls,
                    finish_reason: FinishReason::Stop,
                    input_tokens: 0,
                    output_tokens: 0,
                },
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.response.content.clone().unwrap_or_default(),
                finish_reason: FinishReason::Stop,
                input_tokens: 0,
                output_tokens: 0,
            })
        }

        async fn complete_with_tools(
            &self,
            req: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(req);
            Ok(self.response.clone())
        }
    }

    fn context() -> DecisionContext {
        let mut memory = ConversationMemory::new(10, 10_000);
        memory.append(NewTurn::user("Which channel has the best ROAS?"));
        DecisionContext {
            history: memory.snapshot(),
            steps: Vec::new(),
            tools: vec![ToolDefinition {
                name: "query_marketing_data".to_string(),
                description: "Query".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            filters: Filters::new().with_segment("SME"),
            remaining_iterations: 10,
        }
    }

    async fn decide_with(provider: CannedProvider) -> Decision {
        Reasoning::new(Arc::new(provider)).decide(&context()).await.unwrap()
    }

    #[tokio::test]
    async fn test_native_tool_call_takes_first() {
        let first = ToolCall::new("a", "query_marketing_data", serde_json::json!({"template": "KPI_SUMMARY"}));
        let second = ToolCall::new("b", "create_visualization", serde_json::json!({}));
        let decision = decide_with(CannedProvider::new(None, vec![first.clone(), second])).await;
        assert_eq!(decision, Decision::ToolCall(first));
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_unparseable() {
        let call = ToolCall::new("a", "query_marketing_data", serde_json::Value::String("{template:".into()));
        let decision = decide_with(CannedProvider::new(None, vec![call])).await;
        assert!(matches!(decision, Decision::Unparseable { raw, .. } if raw == "{template:"));
    }

    #[tokio::test]
    async fn test_text_answer_is_cleaned() {
        let decision = decide_with(CannedProvider::new(
            Some("<thinking>check roas</thinking>Email leads at 4.5x.\n\n\n\n![chart](data:image/png;base64,iVBORw0KGgo=)"),
            vec![],
        ))
        .await;
        assert_eq!(decision, Decision::FinalAnswer("Email leads at 4.5x.".to_string()));
    }

    #[tokio::test]
    async fn test_empty_text_is_unparseable() {
        let decision = decide_with(CannedProvider::new(Some("<thinking>hmm</thinking>"), vec![])).await;
        assert!(matches!(decision, Decision::Unparseable { .. }));
    }

    #[test]
    fn test_text_actions() {
        match parse_text(r#"{"action": "query_marketing_data", "action_input": {"template": "TOP_CAMPAIGNS"}}"#) {
            Decision::ToolCall(call) => {
                assert_eq!(call.name, "query_marketing_data");
                assert!(call.id.starts_with("call_"));
                assert_eq!(call.arguments, serde_json::json!({"template": "TOP_CAMPAIGNS"}));
            }
            other => panic!("expected tool call, got {:?}", other),
        }

        assert_eq!(
            parse_text(r#"```json
{"action": "Final Answer", "action_input": "Search drives the most funded loans."}
```"#),
            Decision::FinalAnswer("Search drives the most funded loans.".to_string())
        );

        assert!(matches!(
            parse_text("Action: query_marketing_data(template=KPI"),
            Decision::Unparseable { .. }
        ));
    }

    #[tokio::test]
    async fn test_request_carries_steps_and_filters() {
        let provider = Arc::new(CannedProvider::new(Some("done"), vec![]));
        let engine = Reasoning::new(provider.clone());

        let call = ToolCall::new("call_1", "forecast_performance", serde_json::json!({}));
        let mut ctx = context();
        ctx.steps.push(AgentStep {
            index: 0,
            action: StepAction::ToolCall(call),
            result: Some(ToolResult::failed("forecast_performance", FailureKind::UnknownTool, "no such tool")),
            observation: Some("Error (unknown_tool): no such tool".to_string()),
            continues: true,
        });
        engine.decide(&ctx).await.unwrap();

        let seen = provider.seen.lock().unwrap();
        let messages = &seen[0].messages;
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Segment: SME"));
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[2].tool_calls.is_some());
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(seen[0].tool_choice.as_deref(), Some("auto"));
    }

    #[test]
    fn test_strip_thinking_tags_multiple() {
        let input =
            "<thinking>First thought</thinking>Hello<thinking>Second thought</thinking> world!";
        assert_eq!(strip_thinking_tags(input), "Hello world!");
    }

    #[test]
    fn test_strip_thinking_tags_unclosed() {
        assert_eq!(strip_thinking_tags("Hello <thinking>this never closes"), "Hello");
    }

    #[test]
    fn test_clean_response_drops_inline_base64() {
        let input = "Spend is up.\ndata:image/png;base64,AAAA+/==\nROAS is flat.";
        assert_eq!(clean_response(input), "Spend is up.\n\nROAS is flat.");
    }
}
