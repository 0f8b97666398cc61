use std::fmt;
use std::str::FromStr;

use crate::error_handler::ConfigError;

/// Provider (backend) used for LLM inference.
///
/// `OpenAi` covers every OpenAI-compatible chat API (OpenAI itself,
/// OpenRouter, and self-hosted gateways speaking the same wire format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Local Ollama runtime for on-device inference.
    Ollama,
    /// OpenAI-compatible chat completion API.
    OpenAi,
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    /// Parses provider identifiers as they arrive on review requests.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OLLAMA" => Ok(Self::Ollama),
            "OPENAI" | "OPENROUTER" | "OPENAI_COMPATIBLE" => Ok(Self::OpenAi),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}
