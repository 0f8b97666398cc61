//! Multi-stage review orchestrator.
//!
//! Drives the pipeline for one request:
//!
//! - **Stage 0** planning and prioritization;
//! - **Batching** over the dependency graph;
//! - **Stage 1** parallel batch reviews in bounded waves, then cross-batch
//!   dedup;
//! - **Stage 1.5** optional false-positive verification;
//! - **Reconciliation** with previous-version issues (incremental mode);
//! - **Stage 2** cross-file analysis;
//! - **Stage 3** final report, followed by issue post-processing.
//!
//! Lifecycle events are emitted at stage boundaries. PR file contents may
//! be indexed into the retrieval service for hybrid queries; the index is
//! removed on every exit path, including failure and cancellation.

pub mod context;
pub mod gateway;
pub mod planner;
pub mod postprocess;
pub mod prompt;
pub mod reconcile;
pub mod stage1;
pub mod stage2;
pub mod stage3;
pub mod structured;
pub mod tools;
pub mod verifier;

use std::collections::HashMap;

use ai_llm_service::sanitizer::sanitize_error_for_display;
use contextor::{IndexPrFilesRequest, PrIndexFile};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::diff::{DiffChangeType, DiffProcessor, ProcessedDiff};
use crate::errors::{Error, PrResult};
use crate::events::{EventSink, ReviewOutcome};
use crate::model::request::ReviewRequest;
use gateway::{ContextRetriever, LlmGateway, ToolBackend};

/// Request-scoped coordinator over the pipeline stages.
pub struct Orchestrator<L, R, T> {
    llm: L,
    retriever: R,
    tools: T,
    config: OrchestratorConfig,
    events: EventSink,
    cancel: CancellationToken,
}

impl<L, R, T> Orchestrator<L, R, T>
where
    L: LlmGateway,
    R: ContextRetriever,
    T: ToolBackend,
{
    pub fn new(llm: L, retriever: R, tools: T) -> Self {
        Self {
            llm,
            retriever,
            tools,
            config: OrchestratorConfig::default(),
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach an event sink for streaming consumers.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Attach a cancellation token; cancellation is honored at stage and
    /// wave boundaries.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override pipeline tunables.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the full pipeline for one request.
    ///
    /// Emits `status`/`progress` events throughout and a terminal `error`
    /// event on failure; the caller emits `final` from the returned value.
    /// The PR-unindex finalizer runs on every exit path.
    pub async fn orchestrate(&self, request: &ReviewRequest) -> PrResult<ReviewOutcome> {
        if request.is_incremental() {
            info!(
                previous = request.previous_code_analysis_issues.len(),
                "INCREMENTAL mode: reviewing delta diff"
            );
        } else {
            info!("FULL mode: initial PR review");
        }

        let full_diff = request
            .raw_diff
            .as_deref()
            .map(|raw| DiffProcessor::default().process(raw));
        let delta_diff = request
            .delta_diff
            .as_deref()
            .map(|raw| DiffProcessor::default().process(raw));

        let pr_indexed = self.index_pr_files(request, full_diff.as_ref()).await;

        let result = self
            .run_stages(request, full_diff.as_ref(), delta_diff.as_ref(), pr_indexed)
            .await;

        // Unindex finalizer: every exit path passes through here.
        if pr_indexed {
            self.cleanup_pr_files(request).await;
        }

        if let Err(e) = &result {
            error!(error = %e, "multi-stage review failed");
            let message = match e {
                Error::Cancelled => "cancelled".to_string(),
                other => sanitize_error_for_display(&other.to_string()),
            };
            self.events.error(message).await;
        }
        result
    }

    async fn run_stages(
        &self,
        request: &ReviewRequest,
        full_diff: Option<&ProcessedDiff>,
        delta_diff: Option<&ProcessedDiff>,
        pr_indexed: bool,
    ) -> PrResult<ReviewOutcome> {
        // === STAGE 0: Planning ===
        self.ensure_live()?;
        self.events
            .status("stage_0_started", "Stage 0: Planning & Prioritization...");
        let plan = planner::execute_stage0(
            &self.llm,
            request,
            full_diff,
            self.config.parse_retries,
        )
        .await?;
        let plan = planner::ensure_all_files_planned(plan, &request.changed_files);
        self.events
            .progress(10, "Stage 0 Complete: Review plan created");

        // === Batching ===
        self.ensure_live()?;
        let batches =
            stage1::create_batches(&plan, request, &self.retriever, &self.config).await;

        // === STAGE 1: File Reviews ===
        self.events.status(
            "stage_1_started",
            format!("Stage 1: Analyzing {} files...", plan.file_count()),
        );
        let mut issues = stage1::execute_stage1(
            &self.llm,
            &self.retriever,
            &self.tools,
            request,
            &batches,
            full_diff,
            delta_diff,
            pr_indexed,
            &self.config,
            &self.events,
            &self.cancel,
        )
        .await?;
        self.events.progress(
            60,
            format!("Stage 1 Complete: {} issues found across files", issues.len()),
        );

        // === STAGE 1.5: Verification (optional, fail-open) ===
        self.ensure_live()?;
        issues = verifier::run_verification(
            &self.llm,
            issues,
            request.enrichment_data.as_ref(),
            self.config.parse_retries,
        )
        .await;

        // === Reconciliation ===
        if !request.previous_code_analysis_issues.is_empty() {
            self.ensure_live()?;
            self.events
                .status("reconciliation_started", "Reconciling previous issues...");
            issues = reconcile::reconcile_previous_issues(request, issues, &self.config);
            self.events.progress(
                70,
                format!(
                    "Reconciliation Complete: {} total issues after reconciliation",
                    issues.len()
                ),
            );
        }

        // === STAGE 2: Cross-File Analysis ===
        self.ensure_live()?;
        self.events
            .status("stage_2_started", "Stage 2: Analyzing cross-file patterns...");
        let stage2_result = stage2::execute_stage2(
            &self.llm,
            request,
            &issues,
            &plan,
            self.config.parse_retries,
        )
        .await?;
        self.events
            .progress(85, "Stage 2 Complete: Cross-file analysis finished");

        // === STAGE 3: Aggregation ===
        self.ensure_live()?;
        self.events
            .status("stage_3_started", "Stage 3: Generating final report...");
        let (additions, deletions) = full_diff
            .map(|d| (d.total_additions, d.total_deletions))
            .unwrap_or((0, 0));
        let comment = stage3::execute_stage3(
            &self.llm,
            &self.tools,
            request,
            &plan,
            &issues,
            &stage2_result,
            request.is_incremental(),
            additions,
            deletions,
        )
        .await?;
        self.events
            .progress(100, "Stage 3 Complete: Report generated");

        // === Post-processing ===
        let file_contents: HashMap<String, String> = request
            .enrichment_data
            .as_ref()
            .map(|e| {
                e.file_contents
                    .iter()
                    .filter_map(|f| f.content.clone().map(|c| (f.path.clone(), c)))
                    .collect()
            })
            .unwrap_or_default();
        let issues = postprocess::post_process(
            issues,
            request.raw_diff.as_deref(),
            &file_contents,
            &request.previous_code_analysis_issues,
        );

        Ok(ReviewOutcome { comment, issues })
    }

    /// Index included PR file contents under a PR-scoped tag so per-batch
    /// queries can run in hybrid mode. Best effort.
    async fn index_pr_files(
        &self,
        request: &ReviewRequest,
        full_diff: Option<&ProcessedDiff>,
    ) -> bool {
        if !self.retriever.is_enabled() {
            return false;
        }
        let (Some(pr_number), Some(diff)) = (request.pull_request_id, full_diff) else {
            debug!("no PR number or diff, skipping PR file indexing");
            return false;
        };

        let files: Vec<PrIndexFile> = diff
            .included_files()
            .filter(|f| f.change_type != DiffChangeType::Deleted)
            .filter_map(|f| {
                let content = f.full_content.clone().or_else(|| {
                    (!f.content.is_empty()).then(|| f.content.clone())
                })?;
                Some(PrIndexFile {
                    path: f.path.clone(),
                    content,
                    change_type: f.change_type.as_str().to_uppercase(),
                })
            })
            .collect();
        if files.is_empty() {
            debug!("no files to index for PR");
            return false;
        }

        let req = IndexPrFilesRequest {
            workspace: request.project_workspace.clone(),
            project: request.project_namespace.clone(),
            pr_number,
            branch: request
                .target_branch_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            files,
        };
        match self.retriever.index_pr_files(&req).await {
            Ok(resp) if resp.status == "indexed" => {
                info!(pr_number, chunks = resp.chunks_indexed, "indexed PR files");
                true
            }
            Ok(resp) => {
                warn!(pr_number, status = %resp.status, "PR file indexing not confirmed");
                false
            }
            Err(e) => {
                warn!(error = %e, "error indexing PR files");
                false
            }
        }
    }

    /// Remove PR-scoped index data. Best effort; never fails the request.
    async fn cleanup_pr_files(&self, request: &ReviewRequest) {
        let Some(pr_number) = request.pull_request_id else {
            return;
        };
        match self
            .retriever
            .delete_pr_files(
                &request.project_workspace,
                &request.project_namespace,
                pr_number,
            )
            .await
        {
            Ok(()) => info!(pr_number, "cleaned up PR indexed data"),
            Err(e) => warn!(error = %e, "failed to cleanup PR files"),
        }
    }

    fn ensure_live(&self) -> PrResult<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
