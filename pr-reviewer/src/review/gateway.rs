//! Seams to the external collaborators: LLM provider, retrieval service,
//! and the VCS tool capability.
//!
//! Traits here use static dispatch (generics), matching the crate's
//! no-`async-trait`, no-`Box<dyn ...>` convention. Production impls adapt
//! `ai-llm-service` and `contextor`; tests script their own.

#![allow(async_fn_in_trait)]

use ai_llm_service::chat::{ChatOutcome, ChatTurn, ToolSpec};
use contextor::{
    DeterministicContext, DeterministicQuery, IndexPrFilesRequest, IndexPrFilesResponse,
    PrContextQuery, RagContext,
};
use serde_json::Value;

use crate::errors::RetrievalFailure;

/// Error from an LLM interaction, already stringly for sanitation at the
/// user boundary.
#[derive(Debug, Clone)]
pub struct GatewayError(pub String);

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for GatewayError {}

/// Narrow interface to the LLM provider.
pub trait LlmGateway {
    /// Single non-streaming completion.
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError>;

    /// One chat round with optional tool definitions.
    async fn chat(
        &self,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<ChatOutcome, GatewayError>;
}

impl LlmGateway for ai_llm_service::LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        self.generate(prompt, None)
            .await
            .map_err(|e| GatewayError(e.to_string()))
    }

    async fn chat(
        &self,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<ChatOutcome, GatewayError> {
        ai_llm_service::LlmClient::chat(self, turns, tools)
            .await
            .map_err(|e| GatewayError(e.to_string()))
    }
}

/// Narrow interface to the code-retrieval service.
pub trait ContextRetriever {
    /// Whether retrieval is configured at all. A disabled retriever short-
    /// circuits batching to the directory fallback and skips PR indexing.
    fn is_enabled(&self) -> bool;

    async fn pr_context(&self, query: &PrContextQuery)
    -> Result<Option<RagContext>, RetrievalFailure>;

    async fn deterministic_context(
        &self,
        query: &DeterministicQuery,
    ) -> Result<Option<DeterministicContext>, RetrievalFailure>;

    async fn index_pr_files(
        &self,
        req: &IndexPrFilesRequest,
    ) -> Result<IndexPrFilesResponse, RetrievalFailure>;

    async fn delete_pr_files(
        &self,
        workspace: &str,
        project: &str,
        pr_number: i64,
    ) -> Result<(), RetrievalFailure>;
}

impl ContextRetriever for contextor::RagClient {
    fn is_enabled(&self) -> bool {
        contextor::RagClient::is_enabled(self)
    }

    async fn pr_context(
        &self,
        query: &PrContextQuery,
    ) -> Result<Option<RagContext>, RetrievalFailure> {
        contextor::RagClient::pr_context(self, query)
            .await
            .map_err(RetrievalFailure::from)
    }

    async fn deterministic_context(
        &self,
        query: &DeterministicQuery,
    ) -> Result<Option<DeterministicContext>, RetrievalFailure> {
        contextor::RagClient::deterministic_context(self, query)
            .await
            .map_err(RetrievalFailure::from)
    }

    async fn index_pr_files(
        &self,
        req: &IndexPrFilesRequest,
    ) -> Result<IndexPrFilesResponse, RetrievalFailure> {
        contextor::RagClient::index_pr_files(self, req)
            .await
            .map_err(RetrievalFailure::from)
    }

    async fn delete_pr_files(
        &self,
        workspace: &str,
        project: &str,
        pr_number: i64,
    ) -> Result<(), RetrievalFailure> {
        contextor::RagClient::delete_pr_files(self, workspace, project, pr_number)
            .await
            .map_err(RetrievalFailure::from)
    }
}

/// The VCS tool capability the Tool Executor wraps.
pub trait ToolBackend {
    /// Execute one tool call; the error string is surfaced to the LLM.
    async fn call_tool(&self, name: &str, arguments: &Value) -> Result<String, String>;
}

/// Backend for deployments without a tool capability: every call fails with
/// a descriptive message the LLM can reason about.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToolBackend;

impl ToolBackend for NoToolBackend {
    async fn call_tool(&self, name: &str, _arguments: &Value) -> Result<String, String> {
        Err(format!("Tool '{name}' is not available in this deployment."))
    }
}
