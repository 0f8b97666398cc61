//! Stage 0: planning and prioritization.
//!
//! A direct LLM call (no tools; all metadata is in the prompt) producing a
//! [`ReviewPlan`], followed by the coverage pass that appends any file the
//! model missed to a synthetic MEDIUM "uncategorized" group.

use tracing::{info, warn};

use crate::diff::ProcessedDiff;
use crate::errors::{Error, PrResult};
use crate::model::plan::{FileGroup, Priority, ReviewFile, ReviewPlan};
use crate::model::request::ReviewRequest;
use crate::review::gateway::LlmGateway;
use crate::review::prompt;
use crate::review::structured::parse_structured;

/// Run Stage-0 planning.
pub async fn execute_stage0<L: LlmGateway>(
    llm: &L,
    request: &ReviewRequest,
    processed: Option<&ProcessedDiff>,
    parse_retries: usize,
) -> PrResult<ReviewPlan> {
    let rows: Vec<(String, String, Option<usize>, Option<usize>)> = request
        .changed_files
        .iter()
        .map(|path| {
            let record = processed.and_then(|p| {
                p.files
                    .iter()
                    .find(|f| &f.path == path || f.path.ends_with(&format!("/{path}")))
            });
            match record {
                Some(f) => (
                    path.clone(),
                    f.change_type.as_str().to_uppercase(),
                    Some(f.additions),
                    Some(f.deletions),
                ),
                None => (path.clone(), "MODIFIED".to_string(), None, None),
            }
        })
        .collect();

    let stage0_prompt = prompt::build_stage0_prompt(
        &request.project_vcs_repo_slug,
        &request
            .pull_request_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "?".to_string()),
        request.pr_title.as_deref().unwrap_or(""),
        request.target_branch_name.as_deref().unwrap_or("main"),
        request.commit_hash.as_deref().unwrap_or("HEAD"),
        &prompt::changed_files_rows(&rows),
    );

    let raw = llm
        .complete(&stage0_prompt)
        .await
        .map_err(|e| Error::stage("stage_0", e.to_string()))?;

    let plan: ReviewPlan = parse_structured(
        llm,
        &raw,
        "ReviewPlan",
        prompt::REVIEW_PLAN_SCHEMA,
        parse_retries,
    )
    .await
    .map_err(|e| Error::stage("stage_0", e.to_string()))?;

    info!(
        groups = plan.file_groups.len(),
        skipped = plan.files_to_skip.len(),
        concerns = plan.cross_file_concerns.len(),
        "stage0: plan produced"
    );
    Ok(plan)
}

/// Enforce the coverage invariant: every changed file appears in a group or
/// in `files_to_skip`; stragglers go to a catch-all MEDIUM group.
pub fn ensure_all_files_planned(mut plan: ReviewPlan, changed_files: &[String]) -> ReviewPlan {
    let mut covered: Vec<&str> = plan.planned_paths();
    covered.extend(plan.files_to_skip.iter().map(|f| f.path.as_str()));

    let missing: Vec<&String> = changed_files
        .iter()
        .filter(|f| !covered.contains(&f.as_str()))
        .collect();

    if missing.is_empty() {
        return plan;
    }

    warn!(
        missed = missing.len(),
        "stage0: plan missed files, adding catch-all group"
    );
    plan.file_groups.push(FileGroup {
        group_id: "uncategorized".to_string(),
        priority: Priority::Medium,
        rationale: "Files not categorized by initial planning".to_string(),
        files: missing
            .into_iter()
            .map(|path| ReviewFile {
                path: path.clone(),
                focus_areas: vec!["general review".to_string()],
                risk_level: "MEDIUM".to_string(),
            })
            .collect(),
    });
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_get_a_catch_all_group() {
        let plan = ReviewPlan {
            file_groups: vec![FileGroup {
                group_id: "g1".into(),
                priority: Priority::High,
                rationale: String::new(),
                files: vec![ReviewFile {
                    path: "a.rs".into(),
                    ..Default::default()
                }],
            }],
            ..Default::default()
        };
        let changed = vec!["a.rs".to_string(), "b.rs".to_string()];
        let plan = ensure_all_files_planned(plan, &changed);

        let last = plan.file_groups.last().unwrap();
        assert_eq!(last.group_id, "uncategorized");
        assert_eq!(last.priority, Priority::Medium);
        assert_eq!(last.files[0].path, "b.rs");
    }

    #[test]
    fn skipped_files_count_as_covered() {
        let plan = ReviewPlan {
            files_to_skip: vec![crate::model::plan::FileToSkip {
                path: "generated.rs".into(),
                reason: "generated".into(),
            }],
            ..Default::default()
        };
        let changed = vec!["generated.rs".to_string()];
        let plan = ensure_all_files_planned(plan, &changed);
        assert!(plan.file_groups.is_empty());
    }
}
