//! Request-scoped configuration for the review pipeline.
//!
//! All thresholds live here explicitly instead of module-level statics, so a
//! request carries its own knobs and tests can tighten or loosen them.

/// Tunables for one orchestrated review.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum files per Stage-1 batch.
    pub max_batch_size: usize,
    /// Soft lower bound used when merging small batches.
    pub min_batch_size: usize,
    /// Concurrent batches per Stage-1 wave.
    pub max_parallel_stage_1: usize,
    /// LLM repair retries in the structured-output driver.
    pub parse_retries: usize,
    /// Chunks requested from semantic retrieval per batch.
    pub rag_top_k: u32,
    /// Deterministic retrieval limit per file.
    pub deterministic_limit_per_file: u32,
    /// Reason-similarity threshold for cross-batch dedup.
    pub cross_batch_similarity: f64,
    /// Reason-similarity threshold for adopting a previous issue id.
    pub id_adoption_similarity: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 7,
            min_batch_size: 3,
            max_parallel_stage_1: 5,
            parse_retries: 2,
            rag_top_k: 10,
            deterministic_limit_per_file: 5,
            cross_batch_similarity: 0.75,
            id_adoption_similarity: 0.70,
        }
    }
}
