//! Stage 1: batched file review in waves of bounded parallelism.
//!
//! Batches are built by the dependency-aware batcher, then processed in
//! contiguous waves of at most `max_parallel_stage_1` concurrent batches.
//! A batch failure is isolated: it contributes zero issues and the wave
//! continues. After all waves, a single cross-batch dedup pass suppresses
//! near-identical findings (Stage 1.X).

use contextor::DeterministicQuery;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::diff::ProcessedDiff;
use crate::errors::{BatchFailure, Error, PrResult};
use crate::events::EventSink;
use crate::graph::{BatchItem, DependencyGraph};
use crate::model::issue::ReviewIssue;
use crate::model::plan::{FileReviewBatchOutput, Priority, ReviewPlan};
use crate::model::request::ReviewRequest;
use crate::review::context::{extract_diff_snippets, fetch_batch_context, format_rag_context};
use crate::review::gateway::{ContextRetriever, LlmGateway, ToolBackend};
use crate::review::prompt;
use crate::review::reconcile::{
    deduplicate_cross_batch, format_previous_issues_for_batch, issue_matches_files,
};
use crate::review::structured::parse_structured;
use crate::review::tools::{ToolExecutor, ToolStage};

use ai_llm_service::chat::{ChatOutcome, ChatTurn};

/// Max chat rounds when Stage-1 tools are enabled.
const MAX_TOOL_ROUNDS: usize = 6;

/// Build dependency-aware batches for the plan.
///
/// Preference order: enrichment relationships, then the retrieval service's
/// deterministic context, then shared-directory grouping.
pub async fn create_batches<R: ContextRetriever>(
    plan: &ReviewPlan,
    request: &ReviewRequest,
    retriever: &R,
    cfg: &OrchestratorConfig,
) -> Vec<Vec<BatchItem>> {
    let groups = &plan.file_groups;
    if groups.iter().all(|g| g.files.is_empty()) {
        return Vec::new();
    }

    if let Some(enrichment) = request.enrichment_data.as_ref().filter(|e| e.has_data()) {
        debug!("batching from pre-computed enrichment data");
        let graph = DependencyGraph::from_enrichment(groups, enrichment);
        return graph.smart_batches(groups, cfg.max_batch_size, cfg.min_batch_size);
    }

    if retriever.is_enabled() {
        let mut branches: Vec<String> = request.target_branch_name.iter().cloned().collect();
        if branches.is_empty() {
            branches = vec!["main".to_string(), "master".to_string()];
        }
        let query = DeterministicQuery {
            workspace: request.project_workspace.clone(),
            project: request.project_namespace.clone(),
            branches,
            file_paths: groups
                .iter()
                .flat_map(|g| g.files.iter().map(|f| f.path.clone()))
                .collect(),
            limit_per_file: 15,
        };
        match retriever.deterministic_context(&query).await {
            Ok(Some(ctx)) => {
                debug!("batching from retrieval deterministic context");
                let graph = DependencyGraph::from_deterministic(groups, &ctx);
                return graph.smart_batches(groups, cfg.max_batch_size, cfg.min_batch_size);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "deterministic batching query failed, using directory fallback");
            }
        }
    }

    let graph = DependencyGraph::by_directory(groups);
    graph.smart_batches(groups, cfg.max_batch_size, cfg.min_batch_size)
}

/// Run all Stage-1 waves and the cross-batch dedup pass.
#[allow(clippy::too_many_arguments)]
pub async fn execute_stage1<L, R, T>(
    llm: &L,
    retriever: &R,
    tools: &T,
    request: &ReviewRequest,
    batches: &[Vec<BatchItem>],
    full_diff: Option<&ProcessedDiff>,
    delta_diff: Option<&ProcessedDiff>,
    pr_indexed: bool,
    cfg: &OrchestratorConfig,
    events: &EventSink,
    cancel: &CancellationToken,
) -> PrResult<Vec<ReviewIssue>>
where
    L: LlmGateway,
    R: ContextRetriever,
    T: ToolBackend,
{
    if batches.is_empty() {
        info!("stage1: no batches to review");
        return Ok(Vec::new());
    }

    let total = batches.len();
    let total_files: usize = batches.iter().map(Vec::len).sum();
    info!(
        total_files,
        batches = total,
        "stage1: processing batches in waves of {}",
        cfg.max_parallel_stage_1
    );

    let mut all_issues: Vec<ReviewIssue> = Vec::new();
    let mut completed = 0usize;

    for (wave_idx, wave) in batches.chunks(cfg.max_parallel_stage_1).enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        debug!(wave = wave_idx + 1, size = wave.len(), "stage1: wave started");
        let futures = wave.iter().enumerate().map(|(i, batch)| {
            let batch_idx = completed + i + 1;
            review_batch(
                batch_idx, llm, retriever, tools, request, batch, full_diff, delta_diff,
                pr_indexed, cfg,
            )
        });

        for result in join_all(futures).await {
            match result {
                Ok(issues) => {
                    debug!(count = issues.len(), "stage1: batch finished");
                    all_issues.extend(issues);
                }
                Err(failure) => {
                    error!(batch = failure.batch, cause = %failure.cause, "stage1: batch failed, continuing");
                }
            }
        }

        completed += wave.len();
        let percent = 10 + ((completed as f64 / total as f64) * 50.0).round() as u8;
        events.progress(
            percent,
            format!("Stage 1: Reviewed {completed}/{total} batches"),
        );
    }

    info!(
        issues = all_issues.len(),
        files = total_files,
        "stage1: all waves complete"
    );

    let deduped = deduplicate_cross_batch(all_issues, cfg.cross_batch_similarity);
    Ok(deduped)
}

/// Review one batch of files in a single LLM call.
#[allow(clippy::too_many_arguments)]
async fn review_batch<L, R, T>(
    batch_idx: usize,
    llm: &L,
    retriever: &R,
    tools: &T,
    request: &ReviewRequest,
    batch: &[BatchItem],
    full_diff: Option<&ProcessedDiff>,
    delta_diff: Option<&ProcessedDiff>,
    pr_indexed: bool,
    cfg: &OrchestratorConfig,
) -> Result<Vec<ReviewIssue>, BatchFailure>
where
    L: LlmGateway,
    R: ContextRetriever,
    T: ToolBackend,
{
    let is_incremental = request.is_incremental();
    // Incremental reviews run on the delta; initial reviews on the full diff.
    let diff_source = if is_incremental { delta_diff } else { full_diff };

    let batch_paths: Vec<String> = batch.iter().map(|b| b.file.path.clone()).collect();
    debug!(batch = batch_idx, files = ?batch_paths, "stage1: batch started");

    let mut snippets: Vec<String> = Vec::new();
    let files = prompt::batch_file_contexts(batch, |path| {
        let diff = diff_source.and_then(|d| d.file_diff(path)).unwrap_or("");
        if !diff.is_empty() {
            snippets.extend(extract_diff_snippets(diff));
        }
        let change_type = diff_source
            .and_then(|d| {
                d.files
                    .iter()
                    .find(|f| f.path == path)
                    .map(|f| f.change_type.as_str().to_uppercase())
            })
            .unwrap_or_else(|| "MODIFIED".to_string());
        Some((diff.to_string(), change_type))
    });
    snippets.truncate(10);

    // Skip retrieval entirely when nothing in the batch carries a diff.
    let has_reviewable_diff = files.iter().any(|f| !f.diff.is_empty());
    let rag_context_text = if has_reviewable_diff {
        match fetch_batch_context(retriever, request, &batch_paths, &snippets, pr_indexed, cfg)
            .await
        {
            Some(chunks) => {
                let deleted = full_diff.map(|d| d.deleted_paths()).unwrap_or_default();
                format_rag_context(&chunks, &request.changed_files, &deleted)
            }
            None => String::new(),
        }
    } else {
        String::new()
    };

    let previous_issues_text = {
        let relevant: Vec<_> = request
            .previous_code_analysis_issues
            .iter()
            .filter(|i| issue_matches_files(i, &batch_paths))
            .cloned()
            .collect();
        if relevant.is_empty() {
            String::new()
        } else {
            format_previous_issues_for_batch(&relevant)
        }
    };

    let deleted_files = full_diff.map(|d| d.deleted_paths()).unwrap_or_default();
    let priority = batch.first().map(|b| b.priority).unwrap_or(Priority::Medium);

    let tool_section = if request.use_vcs_tools {
        Some(prompt::stage1_tool_section(
            ToolStage::Stage1.max_calls(),
            request.target_branch_name.as_deref().unwrap_or("main"),
        ))
    } else {
        None
    };

    let batch_prompt = prompt::build_stage1_batch_prompt(
        &files,
        priority,
        &rag_context_text,
        is_incremental,
        &previous_issues_text,
        &request.changed_files,
        &deleted_files,
        tool_section.as_deref(),
    );

    let raw = if request.use_vcs_tools {
        run_with_tools(llm, tools, request, &batch_prompt)
            .await
            .map_err(|cause| BatchFailure {
                batch: batch_idx,
                cause,
            })?
    } else {
        llm.complete(&batch_prompt)
            .await
            .map_err(|e| BatchFailure {
                batch: batch_idx,
                cause: e.to_string(),
            })?
    };

    let output: FileReviewBatchOutput = parse_structured(
        llm,
        &raw,
        "FileReviewBatchOutput",
        prompt::FILE_REVIEW_BATCH_SCHEMA,
        cfg.parse_retries,
    )
    .await
    .map_err(|e| BatchFailure {
        batch: batch_idx,
        cause: e.to_string(),
    })?;

    let issues: Vec<ReviewIssue> = output
        .reviews
        .into_iter()
        .flat_map(|review| review.issues)
        .collect();
    Ok(issues)
}

/// Drive the batch prompt through the tool-calling loop with the Stage-1
/// executor (whitelist + budget).
async fn run_with_tools<L, T>(
    llm: &L,
    backend: &T,
    request: &ReviewRequest,
    batch_prompt: &str,
) -> Result<String, String>
where
    L: LlmGateway,
    T: ToolBackend,
{
    let executor = ToolExecutor::new(
        backend,
        ToolStage::Stage1,
        &request.project_vcs_workspace,
        &request.project_vcs_repo_slug,
    );
    let specs = executor.tool_specs();
    let mut turns = vec![ChatTurn::User(batch_prompt.to_string())];

    for _ in 0..MAX_TOOL_ROUNDS {
        match llm.chat(&turns, &specs).await.map_err(|e| e.to_string())? {
            ChatOutcome::Message(text) => return Ok(text),
            ChatOutcome::ToolCalls(calls) => {
                turns.push(ChatTurn::Assistant {
                    content: None,
                    tool_calls: calls.clone(),
                });
                for call in calls {
                    let answer = executor.execute(&call.name, &call.arguments_json()).await;
                    turns.push(ChatTurn::Tool {
                        call_id: call.id,
                        content: answer,
                    });
                }
            }
        }
    }
    Err("tool loop exceeded its round limit without a final message".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::plan::{FileGroup, ReviewFile};

    fn plan_with(paths: &[&str]) -> ReviewPlan {
        ReviewPlan {
            file_groups: vec![FileGroup {
                group_id: "g".into(),
                priority: Priority::Medium,
                rationale: String::new(),
                files: paths
                    .iter()
                    .map(|p| ReviewFile {
                        path: p.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            }],
            ..Default::default()
        }
    }

    struct OfflineRetriever;
    impl ContextRetriever for OfflineRetriever {
        fn is_enabled(&self) -> bool {
            false
        }
        async fn pr_context(
            &self,
            _q: &contextor::PrContextQuery,
        ) -> Result<Option<contextor::RagContext>, crate::errors::RetrievalFailure> {
            Ok(None)
        }
        async fn deterministic_context(
            &self,
            _q: &DeterministicQuery,
        ) -> Result<Option<contextor::DeterministicContext>, crate::errors::RetrievalFailure>
        {
            Ok(None)
        }
        async fn index_pr_files(
            &self,
            _r: &contextor::IndexPrFilesRequest,
        ) -> Result<contextor::IndexPrFilesResponse, crate::errors::RetrievalFailure> {
            Ok(Default::default())
        }
        async fn delete_pr_files(
            &self,
            _w: &str,
            _p: &str,
            _n: i64,
        ) -> Result<(), crate::errors::RetrievalFailure> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_plan_yields_no_batches() {
        let plan = ReviewPlan::default();
        let request = ReviewRequest::default();
        let batches =
            create_batches(&plan, &request, &OfflineRetriever, &Default::default()).await;
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn directory_fallback_batches_cover_all_files() {
        let plan = plan_with(&["src/a.rs", "src/b.rs", "docs/x.md"]);
        let request = ReviewRequest::default();
        let batches =
            create_batches(&plan, &request, &OfflineRetriever, &Default::default()).await;
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 3);
    }
}
