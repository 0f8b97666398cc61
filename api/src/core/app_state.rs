use contextor::RagClient;

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    /// Client for the external code-retrieval service.
    pub rag: RagClient,
    /// Base URL for OpenAI-compatible providers, e.g. "https://api.openai.com".
    pub openai_base_url: String,
    /// Base URL for a local Ollama runtime, e.g. "http://127.0.0.1:11434".
    pub ollama_url: String,
    /// Per-call LLM timeout in seconds.
    pub llm_timeout_secs: u64,
}

impl AppState {
    /// Build state from environment with safe defaults.
    pub fn from_env() -> Self {
        Self {
            rag: RagClient::from_env(),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            ollama_url: std::env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            llm_timeout_secs: std::env::var("LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
        }
    }
}
