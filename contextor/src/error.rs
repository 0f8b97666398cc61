use thiserror::Error;

/// Errors from the retrieval client.
///
/// Callers treat every variant as non-fatal: a failed retrieval call only
/// costs the requesting stage its extra context.
#[derive(Debug, Error)]
pub enum ContextorError {
    /// Transport failure (DNS/connect/timeout).
    #[error("retrieval transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status from the retrieval service.
    #[error("retrieval service returned status {status}: {snippet}")]
    HttpStatus { status: u16, snippet: String },

    /// Response body could not be decoded.
    #[error("retrieval decode error: {0}")]
    Decode(String),
}
