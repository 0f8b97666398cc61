//! Thin HTTP client for the external code-retrieval service.
//!
//! The review pipeline consumes four operations:
//! - [`RagClient::pr_context`] — semantic search over the indexed repository,
//!   optionally in hybrid mode preferring freshly indexed PR data;
//! - [`RagClient::deterministic_context`] — exact metadata lookups (imports,
//!   extends, class/namespace membership) over changed file paths;
//! - [`RagClient::index_pr_files`] / [`RagClient::delete_pr_files`] —
//!   PR-scoped index lifecycle.
//!
//! A disabled client (RAG_ENABLED unset) returns empty shapes instead of
//! erroring, so the pipeline degrades to diff-only review.

pub mod api_types;
pub mod cfg;
pub mod error;

pub use api_types::{
    CodeChunk, ChunkMetadata, DeterministicContext, DeterministicQuery, IndexPrFilesRequest,
    IndexPrFilesResponse, PrContextQuery, PrIndexFile, RagContext,
};
pub use cfg::RagConfig;
pub use error::ContextorError;

use api_types::{DeterministicResponse, PrContextResponse};
use tracing::{debug, info, warn};

/// Client for the retrieval service API.
#[derive(Debug, Clone)]
pub struct RagClient {
    http: reqwest::Client,
    base_url: String,
    enabled: bool,
}

impl RagClient {
    /// Build a client from config. HTTP client construction is infallible
    /// here; an unusable endpoint surfaces per-call as a transport error.
    pub fn new(cfg: RagConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .unwrap_or_default();

        if cfg.enabled {
            info!(base_url = %cfg.base_url, "RAG client initialized");
        } else {
            info!("RAG client disabled");
        }

        Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            enabled: cfg.enabled,
        }
    }

    /// Build a client from environment variables.
    pub fn from_env() -> Self {
        Self::new(RagConfig::from_env())
    }

    /// Whether retrieval is enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Semantic PR-context query.
    pub async fn pr_context(
        &self,
        query: &PrContextQuery,
    ) -> Result<Option<RagContext>, ContextorError> {
        if !self.enabled {
            debug!("RAG disabled, returning empty pr-context");
            return Ok(None);
        }

        let url = format!("{}/query/pr-context", self.base_url);
        let resp: PrContextResponse = self.post_json(&url, query).await?;
        Ok(resp.context)
    }

    /// Deterministic metadata lookup over changed file paths.
    pub async fn deterministic_context(
        &self,
        query: &DeterministicQuery,
    ) -> Result<Option<DeterministicContext>, ContextorError> {
        if !self.enabled {
            debug!("RAG disabled, returning empty deterministic-context");
            return Ok(None);
        }

        let url = format!("{}/query/deterministic-context", self.base_url);
        let resp: DeterministicResponse = self.post_json(&url, query).await?;
        Ok(resp.context)
    }

    /// Push PR file contents into the index under a PR-scoped tag.
    pub async fn index_pr_files(
        &self,
        req: &IndexPrFilesRequest,
    ) -> Result<IndexPrFilesResponse, ContextorError> {
        if !self.enabled {
            return Ok(IndexPrFilesResponse::default());
        }

        let url = format!("{}/index/pr-files", self.base_url);
        self.post_json(&url, req).await
    }

    /// Remove PR-scoped index data. Best effort: callers log and continue.
    pub async fn delete_pr_files(
        &self,
        workspace: &str,
        project: &str,
        pr_number: i64,
    ) -> Result<(), ContextorError> {
        if !self.enabled {
            return Ok(());
        }

        let url = format!(
            "{}/index/pr-files?workspace={workspace}&project={project}&pr_number={pr_number}",
            self.base_url
        );
        let resp = self.http.delete(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let snippet = resp.text().await.unwrap_or_default();
            warn!(status, "delete_pr_files returned non-success status");
            return Err(ContextorError::HttpStatus {
                status,
                snippet: truncate(&snippet, 200),
            });
        }
        Ok(())
    }

    /// Liveness probe of the retrieval service.
    pub async fn is_healthy(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "RAG health check failed");
                false
            }
        }
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, ContextorError>
    where
        B: serde::Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let snippet = resp.text().await.unwrap_or_default();
            return Err(ContextorError::HttpStatus {
                status: status.as_u16(),
                snippet: truncate(&snippet, 200),
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ContextorError::Decode(e.to_string()))
    }
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    s.chars().take(n).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_returns_empty_shapes() {
        let client = RagClient::new(RagConfig {
            enabled: false,
            ..RagConfig::default()
        });

        let ctx = client
            .pr_context(&PrContextQuery {
                workspace: "w".into(),
                project: "p".into(),
                branch: "main".into(),
                changed_files: vec![],
                diff_snippets: vec![],
                pr_title: None,
                pr_description: None,
                top_k: 10,
                pr_number: None,
                all_pr_changed_files: None,
            })
            .await
            .unwrap();
        assert!(ctx.is_none());

        let idx = client
            .index_pr_files(&IndexPrFilesRequest {
                workspace: "w".into(),
                project: "p".into(),
                pr_number: 1,
                branch: "main".into(),
                files: vec![],
            })
            .await
            .unwrap();
        assert_eq!(idx.chunks_indexed, 0);
        assert!(client.delete_pr_files("w", "p", 1).await.is_ok());
    }

    #[test]
    fn chunk_path_prefers_metadata_path() {
        let chunk = CodeChunk {
            metadata: ChunkMetadata {
                path: "a/b.rs".into(),
                file_path: "c/d.rs".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(chunk.path(), "a/b.rs");
    }
}
