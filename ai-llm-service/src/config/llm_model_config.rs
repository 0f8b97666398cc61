use crate::config::llm_provider::LlmProvider;

/// Configuration for an LLM model invocation.
///
/// Contains both general and provider-specific parameters. Extend as needed
/// to support new backends or features.
#[derive(Debug, Clone)]
pub struct LlmModelConfig {
    /// The LLM provider/backend (Ollama or an OpenAI-compatible API).
    pub provider: LlmProvider,

    /// Model identifier string (e.g. `"gpt-4o"`, `"qwen2.5-coder:7b"`).
    pub model: String,

    /// Inference endpoint (local socket/URL or remote API base URL).
    pub endpoint: String,

    /// Optional API key for authentication.
    pub api_key: Option<String>,

    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,

    /// Optional request timeout (in seconds).
    pub timeout_secs: Option<u64>,
}

impl LlmModelConfig {
    /// Minimal config for a provider/model/endpoint triple; sampling knobs
    /// stay unset and the default timeout applies.
    pub fn new(provider: LlmProvider, model: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            endpoint: endpoint.into(),
            api_key: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            timeout_secs: None,
        }
    }

    /// Attach an API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Attach a per-request token cap.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}
