//! Multi-stage AI code-review orchestrator.
//!
//! Given a pull-request description (metadata, changed files, raw unified
//! diff, optional prior-issue history, optional pre-computed enrichment
//! graph), produces a structured review report by driving an LLM provider
//! through a disciplined pipeline:
//!
//! 1) **Stage 0 — Planning**: classify files into priority groups and
//!    hypothesize cross-file concerns.
//! 2) **Batching**: dependency-aware batches over the relationship graph
//!    (enrichment data, deterministic retrieval, or directory fallback).
//! 3) **Stage 1 — Batch review**: waves of bounded parallelism; per batch,
//!    two-pronged retrieval context and a structured LLM review; failures
//!    isolate to the batch. Cross-batch dedup follows.
//! 4) **Stage 1.5 — Verification** (optional): drop diff-blindness false
//!    positives by searching cached file contents.
//! 5) **Reconciliation**: merge previous-version issues by id and semantic
//!    similarity; resolved issues stay resolved.
//! 6) **Stage 2 — Cross-file analysis** and **Stage 3 — Aggregation** into
//!    the final markdown report, then post-processing (line correction,
//!    dedup, diff hygiene).
//!
//! Progress is exposed as an ordered event stream consumed by the HTTP
//! transport as NDJSON. The crate holds no state across requests.
//!
//! Uses `tracing` for logging and avoids `async-trait` and heap trait
//! objects; collaborator seams are generic traits with static dispatch.

pub mod config;
pub mod diff;
pub mod errors;
pub mod events;
pub mod graph;
pub mod model;
pub mod review;
pub mod similarity;

pub use config::OrchestratorConfig;
pub use errors::{Error, PrResult};
pub use events::{Event, EventSink, ReviewOutcome};
pub use model::issue::{Category, ReviewIssue, Severity};
pub use model::request::{AnalysisMode, PreviousIssue, ReviewRequest};
pub use review::Orchestrator;
pub use review::gateway::{ContextRetriever, LlmGateway, NoToolBackend, ToolBackend};
