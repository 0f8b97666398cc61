//! Crate-wide error hierarchy for pr-reviewer.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - The coordinator surfaces only stage-fatal failures and cancellation;
//!   every other class degrades inside the component that caught it.
//! - No dynamic dispatch, no async-trait, ergonomic `?` via `From` impls.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type PrResult<T> = Result<T, Error>;

/// Root error type for the pr-reviewer crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A pipeline stage could not produce its output. Request-fatal.
    #[error("{0}")]
    Stage(StageFailure),

    /// Cooperative cancellation from the caller. No response payload.
    #[error("cancelled")]
    Cancelled,

    /// Input validation errors (bad modes, missing fields).
    #[error("validation error: {0}")]
    Validation(String),

    /// Generic catch-all when nothing else fits.
    #[error("other error: {0}")]
    Other(String),
}

impl Error {
    /// Wrap a cause as a fatal failure of the named stage.
    pub fn stage(stage: &'static str, cause: impl Into<String>) -> Self {
        Error::Stage(StageFailure {
            stage,
            cause: cause.into(),
        })
    }
}

/// Fatal failure of one pipeline stage.
#[derive(Debug, Error)]
#[error("stage {stage} failed: {cause}")]
pub struct StageFailure {
    /// Stage name (`stage_0` .. `stage_3`).
    pub stage: &'static str,
    /// Human-readable cause, already safe for logs (not for users).
    pub cause: String,
}

/// LLM output could not be parsed after the repair budget. Stage-fatal once
/// it escapes the Structured-Output Driver.
#[derive(Debug, Error)]
#[error("failed to parse {schema} after retries: {last_error}")]
pub struct ParseFailure {
    /// Name of the schema the output was validated against.
    pub schema: &'static str,
    /// Last parser/validator error message.
    pub last_error: String,
}

/// A single Stage-1 batch failed. Isolated: logged, zero issues from the
/// batch, the wave continues.
#[derive(Debug, Error)]
#[error("batch {batch} failed: {cause}")]
pub struct BatchFailure {
    pub batch: usize,
    pub cause: String,
}

/// A retrieval call failed or timed out. Non-fatal: the affected batch or
/// stage proceeds with empty context.
#[derive(Debug, Error)]
#[error("retrieval failed: {0}")]
pub struct RetrievalFailure(pub String);

impl From<contextor::ContextorError> for RetrievalFailure {
    fn from(e: contextor::ContextorError) -> Self {
        RetrievalFailure(e.to_string())
    }
}

impl From<ParseFailure> for Error {
    fn from(e: ParseFailure) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failure_names_the_stage() {
        let err = Error::stage("stage_0", "no parseable plan");
        assert_eq!(err.to_string(), "stage stage_0 failed: no parseable plan");
    }
}
