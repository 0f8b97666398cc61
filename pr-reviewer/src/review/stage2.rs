//! Stage 2: cross-file and architectural analysis.
//!
//! A single structured LLM call over the deduplicated Stage-1 issues and
//! the plan's cross-file hypotheses. No tools.

use tracing::info;

use crate::errors::{Error, PrResult};
use crate::model::issue::ReviewIssue;
use crate::model::plan::{CrossFileAnalysisResult, ReviewPlan};
use crate::model::request::ReviewRequest;
use crate::review::gateway::LlmGateway;
use crate::review::prompt;
use crate::review::structured::parse_structured;

/// Run Stage-2 cross-file analysis.
pub async fn execute_stage2<L: LlmGateway>(
    llm: &L,
    request: &ReviewRequest,
    stage1_issues: &[ReviewIssue],
    plan: &ReviewPlan,
    parse_retries: usize,
) -> PrResult<CrossFileAnalysisResult> {
    let issues_json = serde_json::to_string_pretty(stage1_issues)
        .unwrap_or_else(|_| "[]".to_string());

    let stage2_prompt = prompt::build_stage2_prompt(
        &request.project_vcs_repo_slug,
        request.pr_title.as_deref().unwrap_or(""),
        request.commit_hash.as_deref().unwrap_or("HEAD"),
        &issues_json,
        &plan.cross_file_concerns,
    );

    let raw = llm
        .complete(&stage2_prompt)
        .await
        .map_err(|e| Error::stage("stage_2", e.to_string()))?;

    let result: CrossFileAnalysisResult = parse_structured(
        llm,
        &raw,
        "CrossFileAnalysisResult",
        prompt::CROSS_FILE_SCHEMA,
        parse_retries,
    )
    .await
    .map_err(|e| Error::stage("stage_2", e.to_string()))?;

    info!(
        risk = %result.pr_risk_level,
        cross_file_issues = result.cross_file_issues.len(),
        "stage2: cross-file analysis complete"
    );
    Ok(result)
}
