//! Wire types for the external code-retrieval service.
//!
//! Shapes mirror the service's JSON responses; unknown fields are ignored,
//! and everything the service may omit is optional with defaults so a
//! partial response still deserializes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Semantic query for PR-scoped context.
#[derive(Debug, Clone, Serialize)]
pub struct PrContextQuery {
    pub workspace: String,
    pub project: String,
    pub branch: String,
    pub changed_files: Vec<String>,
    pub diff_snippets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_description: Option<String>,
    pub top_k: u32,
    /// Present only in hybrid mode, when PR files were indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<i64>,
    /// Full PR changed-file list for hybrid-mode freshness ranking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_pr_changed_files: Option<Vec<String>>,
}

/// Deterministic (metadata-match) query over file paths.
#[derive(Debug, Clone, Serialize)]
pub struct DeterministicQuery {
    pub workspace: String,
    pub project: String,
    pub branches: Vec<String>,
    pub file_paths: Vec<String>,
    pub limit_per_file: u32,
}

/// Envelope of the pr-context response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrContextResponse {
    #[serde(default)]
    pub context: Option<RagContext>,
}

/// Retrieved context: scored code chunks plus optional related file list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RagContext {
    #[serde(default)]
    pub relevant_code: Vec<CodeChunk>,
    #[serde(default)]
    pub related_files: Vec<String>,
}

/// Envelope of the deterministic-context response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeterministicResponse {
    #[serde(default)]
    pub context: Option<DeterministicContext>,
}

/// Deterministic context keyed by file/symbol/class/namespace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeterministicContext {
    #[serde(default)]
    pub changed_files: HashMap<String, Vec<CodeChunk>>,
    #[serde(default)]
    pub related_definitions: HashMap<String, Vec<CodeChunk>>,
    #[serde(default)]
    pub class_context: HashMap<String, Vec<CodeChunk>>,
    #[serde(default)]
    pub namespace_context: HashMap<String, Vec<CodeChunk>>,
}

/// One scored chunk of retrieved code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeChunk {
    #[serde(default, alias = "content")]
    pub text: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub score: f64,
    /// Provenance tag (`pr_indexed`, `deterministic`, empty for semantic).
    #[serde(default, alias = "_source")]
    pub source: String,
}

impl CodeChunk {
    /// Best-effort path: metadata `path` first, then `file_path`.
    pub fn path(&self) -> &str {
        if !self.metadata.path.is_empty() {
            &self.metadata.path
        } else {
            &self.metadata.file_path
        }
    }
}

/// Tree-sitter-derived metadata attached to a chunk by the indexer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub primary_name: Option<String>,
    #[serde(default)]
    pub semantic_names: Vec<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default)]
    pub parent_class: Option<String>,
    #[serde(default)]
    pub parent_context: Vec<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// One PR file pushed to the index.
#[derive(Debug, Clone, Serialize)]
pub struct PrIndexFile {
    pub path: String,
    pub content: String,
    pub change_type: String,
}

/// Request body for PR file indexing.
#[derive(Debug, Clone, Serialize)]
pub struct IndexPrFilesRequest {
    pub workspace: String,
    pub project: String,
    pub pr_number: i64,
    pub branch: String,
    pub files: Vec<PrIndexFile>,
}

/// Response of the index operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexPrFilesResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chunks_indexed: u64,
}
