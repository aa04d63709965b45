//! LLM integration for the agent.
//!
//! [`LlmProvider`] is the transport seam (an OpenAI-compatible chat
//! completions client ships with the crate). [`ReasoningEngine`] sits on top
//! and turns a conversation plus the running trace into one [`Decision`].

mod openai;
mod provider;
mod reasoning;

pub use openai::OpenAiChatProvider;
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};
pub use reasoning::{Decision, DecisionContext, Reasoning, ReasoningEngine, clean_response};

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Create the chat provider described by `config`.
pub fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    tracing::info!(
        base_url = %config.base_url,
        model = %config.model,
        "Using OpenAI-compatible chat completions API"
    );
    Ok(Arc::new(OpenAiChatProvider::new(config.clone())?))
}

/// Create the LLM-backed reasoning engine for `config`.
pub fn create_reasoning_engine(config: &LlmConfig) -> Result<Arc<dyn ReasoningEngine>, LlmError> {
    let provider = create_llm_provider(config)?;
    Ok(Arc::new(
        Reasoning::new(provider)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens),
    ))
}
