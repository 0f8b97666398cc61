use pr_reviewer::ReviewOutcome;
use serde::Serialize;

/// Non-streaming response body of the review endpoint.
#[derive(Serialize)]
pub struct ReviewResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ReviewOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReviewResponse {
    pub fn success(result: ReviewOutcome) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }
}
