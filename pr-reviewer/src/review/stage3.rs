//! Stage 3: aggregation into the final markdown report.
//!
//! Free-form markdown output, so no structured parsing. In incremental
//! mode the prompt is prefixed with resolution counts. When tools are
//! enabled, the Stage-3 executor allows verification reads within its
//! budget.

use tracing::info;

use ai_llm_service::chat::{ChatOutcome, ChatTurn};

use crate::errors::{Error, PrResult};
use crate::model::issue::ReviewIssue;
use crate::model::plan::{CrossFileAnalysisResult, ReviewPlan};
use crate::model::request::ReviewRequest;
use crate::review::gateway::{LlmGateway, ToolBackend};
use crate::review::prompt;
use crate::review::tools::{ToolExecutor, ToolStage};

/// Max chat rounds when Stage-3 verification tools are enabled.
const MAX_TOOL_ROUNDS: usize = 8;

/// Run Stage-3 aggregation and return the report markdown.
#[allow(clippy::too_many_arguments)]
pub async fn execute_stage3<L, T>(
    llm: &L,
    tools: &T,
    request: &ReviewRequest,
    plan: &ReviewPlan,
    issues: &[ReviewIssue],
    stage2: &CrossFileAnalysisResult,
    is_incremental: bool,
    additions: usize,
    deletions: usize,
) -> PrResult<String>
where
    L: LlmGateway,
    T: ToolBackend,
{
    let incremental_context = if is_incremental {
        let resolved = issues.iter().filter(|i| i.is_resolved).count();
        let new_count = issues.len() - resolved;
        prompt::incremental_context_block(
            request.previous_code_analysis_issues.len(),
            resolved,
            new_count,
            issues.len(),
        )
    } else {
        String::new()
    };

    let pr_id = request
        .pull_request_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "?".to_string());

    let tool_section = if request.use_vcs_tools {
        Some(prompt::stage3_verification_section(
            ToolStage::Stage3.max_calls(),
            request.target_branch_name.as_deref().unwrap_or("main"),
            &pr_id,
        ))
    } else {
        None
    };

    let stage3_prompt = prompt::build_stage3_prompt(
        &request.project_vcs_repo_slug,
        &pr_id,
        request.pr_title.as_deref().unwrap_or(""),
        request.changed_files.len(),
        additions,
        deletions,
        &serde_json::to_string_pretty(plan).unwrap_or_else(|_| "{}".to_string()),
        &serde_json::to_string_pretty(issues).unwrap_or_else(|_| "[]".to_string()),
        &serde_json::to_string_pretty(stage2).unwrap_or_else(|_| "{}".to_string()),
        &stage2.pr_recommendation,
        &incremental_context,
        tool_section.as_deref(),
    );

    let report = if request.use_vcs_tools {
        run_with_tools(llm, tools, request, &pr_id, &stage3_prompt)
            .await
            .map_err(|e| Error::stage("stage_3", e))?
    } else {
        llm.complete(&stage3_prompt)
            .await
            .map_err(|e| Error::stage("stage_3", e.to_string()))?
    };

    info!(report_len = report.len(), "stage3: report generated");
    Ok(report)
}

async fn run_with_tools<L, T>(
    llm: &L,
    backend: &T,
    request: &ReviewRequest,
    pr_id: &str,
    stage3_prompt: &str,
) -> Result<String, String>
where
    L: LlmGateway,
    T: ToolBackend,
{
    let executor = ToolExecutor::new(
        backend,
        ToolStage::Stage3,
        &request.project_vcs_workspace,
        &request.project_vcs_repo_slug,
    );
    let specs = executor.tool_specs();
    let mut turns = vec![ChatTurn::User(stage3_prompt.to_string())];

    for _ in 0..MAX_TOOL_ROUNDS {
        match llm.chat(&turns, &specs).await.map_err(|e| e.to_string())? {
            ChatOutcome::Message(text) => return Ok(text),
            ChatOutcome::ToolCalls(calls) => {
                turns.push(ChatTurn::Assistant {
                    content: None,
                    tool_calls: calls.clone(),
                });
                for call in calls {
                    let mut args = call.arguments_json();
                    // Default the PR id so verification reads need no guessing.
                    if call.name == "getPullRequestComments" {
                        if let serde_json::Value::Object(map) = &mut args {
                            map.entry("pullRequestId")
                                .or_insert_with(|| serde_json::Value::String(pr_id.to_string()));
                        }
                    }
                    let answer = executor.execute(&call.name, &args).await;
                    turns.push(ChatTurn::Tool {
                        call_id: call.id,
                        content: answer,
                    });
                }
            }
        }
    }
    Err("tool loop exceeded its round limit without a final report".to_string())
}
