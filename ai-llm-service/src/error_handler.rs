//! Error types and validation helpers for `ai-llm-service`.
//!
//! One root [`AiLlmError`] for all public operations, with provider-aware
//! detail in [`ProviderError`] and config/env problems in [`ConfigError`].
//!
//! All messages include the suffix `[AI LLM Service]` so logs and bubbled-up
//! errors can be attributed to this library.

use reqwest::StatusCode;
use thiserror::Error;

/// Root error type for the crate.
#[derive(Debug, Error)]
pub enum AiLlmError {
    /// Provider-level failure (bad config, HTTP status, decode problems).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Transport failure from the HTTP client (DNS/connect/timeout).
    #[error("[AI LLM Service] transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),

    /// Environment/config-driven setup failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AiLlmError {
    /// True when the failure is a transport-level timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::HttpTransport(e) if e.is_timeout())
    }
}

/// Which provider produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Ollama,
}

/// Provider error with its origin attached.
#[derive(Debug, Error)]
#[error("[AI LLM Service] {provider:?}: {kind}")]
pub struct ProviderError {
    pub provider: Provider,
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    pub fn new(provider: Provider, kind: ProviderErrorKind) -> Self {
        Self { provider, kind }
    }
}

/// Detailed provider failure kinds.
#[derive(Debug, Error)]
pub enum ProviderErrorKind {
    /// The config names a different provider than the service expects.
    #[error("invalid provider for this service")]
    InvalidProvider,

    /// API key required but absent.
    #[error("missing API key")]
    MissingApiKey,

    /// Endpoint empty or not http(s).
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Non-2xx HTTP response from the provider.
    #[error("http status {} from {}: {}", .0.status, .0.url, .0.snippet)]
    HttpStatus(HttpError),

    /// Response body could not be decoded into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Chat completion returned no usable choices.
    #[error("empty choices in completion response")]
    EmptyChoices,
}

/// Captured detail of a non-success HTTP response.
#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub url: String,
    pub snippet: String,
}

/// Short, single-line snippet of a response body for logs and errors.
pub fn make_snippet(body: &str) -> String {
    let flat: String = body
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    let trimmed = flat.trim();
    if trimmed.len() > 240 {
        let mut end = 240;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

/// Error enum for environment/config-driven setup.
///
/// Keep this focused: only errors that realistically happen at config
/// load/validation time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing or empty.
    #[error("[AI LLM Service] missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A number failed to parse (ports, limits, timeouts).
    #[error("[AI LLM Service] invalid number in {var}: {reason}")]
    InvalidNumber {
        var: &'static str,
        reason: &'static str,
    },

    /// Unsupported provider identifier.
    #[error("[AI LLM Service] unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Value had the wrong format (e.g. invalid URL).
    #[error("[AI LLM Service] invalid format in {var}: {reason}")]
    InvalidFormat {
        var: &'static str,
        reason: &'static str,
    },
}

/* ------------------------ Env helpers ------------------------ */

/// Fetches a required, non-empty environment variable.
pub fn must_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

/// Parses an optional `u32` from env (`Ok(None)` if unset/empty).
pub fn env_opt_u32(name: &'static str) -> Result<Option<u32>, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            v.parse::<u32>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidNumber {
                    var: name,
                    reason: "expected u32",
                })
        }
        _ => Ok(None),
    }
}

/// Validates that an HTTP endpoint starts with `http://` or `https://`.
pub fn validate_http_endpoint(var: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidFormat {
            var,
            reason: "must start with http:// or https://",
        })
    }
}
