//! Environment-driven configuration for the retrieval client.

use std::time::Duration;

/// Config knobs for [`crate::RagClient`], resolved from environment.
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Base URL of the retrieval service.
    pub base_url: String,
    /// Master switch; a disabled client answers with empty shapes.
    pub enabled: bool,
    /// Per-call HTTP timeout.
    pub timeout: Duration,
}

impl RagConfig {
    /// Read config from env with safe defaults.
    ///
    /// - `RAG_API_URL` (default `http://rag-pipeline:8001`)
    /// - `RAG_ENABLED` (default `false`)
    /// - `RAG_TIMEOUT_SECS` (default `30`)
    pub fn from_env() -> Self {
        let base_url = std::env::var("RAG_API_URL")
            .unwrap_or_else(|_| "http://rag-pipeline:8001".to_string());
        let enabled = std::env::var("RAG_ENABLED")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let timeout_secs = std::env::var("RAG_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        Self {
            base_url,
            enabled,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            base_url: "http://rag-pipeline:8001".to_string(),
            enabled: false,
            timeout: Duration::from_secs(30),
        }
    }
}
