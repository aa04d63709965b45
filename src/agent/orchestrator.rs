//! The decide/act/observe loop for one user message.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent::memory::{ConversationMemory, NewTurn};
use crate::agent::trace::{AgentStep, StepAction};
use crate::charts::ChartSpec;
use crate::error::{AgentError, LlmError};
use crate::llm::{Decision, DecisionContext, ReasoningEngine, ToolCall, clean_response};
use crate::query::QueryResult;
use crate::tools::{Filters, ToolContext, ToolRegistry};

const TRUNCATION_MARKER: &str = "...[truncated]";

/// Where the loop is within one iteration.
#[derive(Debug)]
enum LoopState {
    AwaitingDecision,
    ToolDispatch(ToolCall),
    Observation(AgentStep),
    Done(String),
}

/// Everything one run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub answer: String,
    pub steps: Vec<AgentStep>,
    pub tables: Vec<QueryResult>,
    pub chart: Option<ChartSpec>,
}

/// Drives the reasoning engine and tool registry for one message.
pub struct Orchestrator {
    engine: Arc<dyn ReasoningEngine>,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
    tool_output_max_chars: usize,
    engine_timeout: Duration,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ReasoningEngine>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            engine,
            tools,
            max_iterations: 10,
            tool_output_max_chars: 4000,
            engine_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tool_output_max_chars(mut self, max_chars: usize) -> Self {
        self.tool_output_max_chars = max_chars;
        self
    }

    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    /// Answer `message`, recording every turn in `memory`.
    ///
    /// The user turn is appended before anything else, so it survives any
    /// error returned from here.
    pub async fn run(
        &self,
        memory: &mut ConversationMemory,
        message: &str,
        filters: Filters,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, AgentError> {
        memory.append(NewTurn::user(message));
        let history = memory.snapshot();

        let mut ctx = ToolContext::new(filters);
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut state = LoopState::AwaitingDecision;

        tracing::info!(
            history = history.len(),
            max_iterations = self.max_iterations,
            "Agent run started"
        );

        let answer = loop {
            state = match state {
                LoopState::AwaitingDecision => {
                    let index = steps.len();
                    if index >= self.max_iterations {
                        tracing::warn!(iterations = index, "Iteration cap reached without a final answer");
                        steps.push(AgentStep {
                            index,
                            action: StepAction::IterationCap,
                            result: None,
                            observation: None,
                            continues: false,
                        });
                        LoopState::Done(cap_answer(self.max_iterations))
                    } else {
                        let decision_ctx = DecisionContext {
                            history: history.clone(),
                            steps: steps.clone(),
                            tools: self.tools.definitions(),
                            filters: ctx.filters().clone(),
                            remaining_iterations: self.max_iterations - index,
                        };
                        match self.decide(&decision_ctx, cancel).await? {
                            Decision::ToolCall(call) => LoopState::ToolDispatch(call),
                            Decision::FinalAnswer(text) => {
                                let answer = clean_response(&text);
                                if answer.is_empty() {
                                    parse_failure(index, text, "the final answer was empty".to_string())
                                } else {
                                    steps.push(AgentStep {
                                        index,
                                        action: StepAction::FinalAnswer(answer.clone()),
                                        result: None,
                                        observation: None,
                                        continues: false,
                                    });
                                    LoopState::Done(answer)
                                }
                            }
                            Decision::Unparseable { raw, reason } => parse_failure(index, raw, reason),
                        }
                    }
                }

                LoopState::ToolDispatch(call) => {
                    if cancel.is_cancelled() {
                        return Err(AgentError::Cancelled);
                    }
                    tracing::info!(tool = %call.name, step = steps.len(), "Dispatching tool call");

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        result = self.tools.invoke(&call, &mut ctx) => result,
                    };

                    if result.is_fatal() {
                        tracing::error!(tool = %call.name, "Data store unavailable; ending turn");
                        return Err(AgentError::DataStoreUnavailable);
                    }
                    if let Some(failure) = &result.error {
                        tracing::warn!(tool = %call.name, kind = %failure.kind, "Tool call failed");
                    }

                    let observation = truncate_chars(&result.observation(), self.tool_output_max_chars);
                    memory.append(NewTurn::tool(&call.name, &observation));

                    LoopState::Observation(AgentStep {
                        index: steps.len(),
                        action: StepAction::ToolCall(call),
                        result: Some(result),
                        observation: Some(observation),
                        continues: true,
                    })
                }

                LoopState::Observation(step) => {
                    steps.push(step);
                    LoopState::AwaitingDecision
                }

                LoopState::Done(answer) => break answer,
            };
        };

        memory.append(NewTurn::assistant(&answer));
        tracing::info!(steps = steps.len(), "Agent run finished");

        let (tables, chart) = ctx.into_outputs();
        Ok(RunOutcome {
            answer,
            steps,
            tables,
            chart,
        })
    }

    /// One engine call, bounded by the timeout and raced against cancellation.
    async fn decide(
        &self,
        ctx: &DecisionContext,
        cancel: &CancellationToken,
    ) -> Result<Decision, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            outcome = tokio::time::timeout(self.engine_timeout, self.engine.decide(ctx)) => outcome,
        };

        match outcome {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Reasoning engine call failed");
                Err(AgentError::ReasoningEngine(e))
            }
            Err(_) => {
                tracing::error!(timeout = ?self.engine_timeout, "Reasoning engine timed out");
                Err(LlmError::Timeout(self.engine_timeout).into())
            }
        }
    }
}

fn parse_failure(index: usize, raw: String, reason: String) -> LoopState {
    tracing::warn!(step = index, reason = %reason, "Could not parse engine output");
    let observation = format!(
        "Could not parse action: {}. Retry with exactly one tool call or a final answer.",
        reason
    );
    LoopState::Observation(AgentStep {
        index,
        action: StepAction::ParseFailure { raw, reason },
        result: None,
        observation: Some(observation),
        continues: true,
    })
}

fn cap_answer(max_iterations: usize) -> String {
    format!(
        "I reached the limit of {} analysis steps for this question before finishing. \
         Please try a narrower question, for example a single template, date range or channel.",
        max_iterations
    )
}

/// Keep at most `max` characters, marking the cut.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}
