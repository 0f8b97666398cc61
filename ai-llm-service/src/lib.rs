//! Shared LLM service used by the review pipeline.
//!
//! Provides thin, non-streaming clients for two provider families:
//! - OpenAI-compatible chat APIs (`/v1/chat/completions`), including
//!   function/tool calling;
//! - local Ollama (`/api/generate`).
//!
//! Dispatch is enum-based: no `async-trait` and no `Box<dyn ...>`. Errors are
//! normalized into [`error_handler::AiLlmError`], and
//! [`sanitizer::sanitize_error_for_display`] maps raw provider failures to
//! short, user-safe prose.

pub mod chat;
pub mod config;
pub mod error_handler;
pub mod sanitizer;
pub mod services;

use chat::{ChatOutcome, ChatTurn, ToolSpec};
use config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider};
use error_handler::AiLlmError;
use services::{ollama_service::OllamaService, open_ai_service::OpenAiService};

/// Thin enum client over the supported providers.
pub enum LlmClient {
    OpenAi(OpenAiService),
    Ollama(OllamaService),
}

impl LlmClient {
    /// Construct a client from a full model config.
    pub fn from_config(cfg: LlmModelConfig) -> Result<Self, AiLlmError> {
        match cfg.provider {
            LlmProvider::OpenAi => Ok(Self::OpenAi(OpenAiService::new(cfg)?)),
            LlmProvider::Ollama => Ok(Self::Ollama(OllamaService::new(cfg)?)),
        }
    }

    /// Single non-streaming completion for a plain prompt.
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, AiLlmError> {
        match self {
            Self::OpenAi(c) => c.generate(prompt, system).await,
            Self::Ollama(c) => c.generate(prompt, system).await,
        }
    }

    /// One chat round with optional tool definitions.
    ///
    /// Ollama has no function-calling surface here; the turns are flattened
    /// into a single prompt and the outcome is always a plain message.
    pub async fn chat(
        &self,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<ChatOutcome, AiLlmError> {
        match self {
            Self::OpenAi(c) => c.chat(turns, tools).await,
            Self::Ollama(c) => {
                let prompt = chat::flatten_turns(turns);
                let text = c.generate(&prompt, None).await?;
                Ok(ChatOutcome::Message(text))
            }
        }
    }
}
