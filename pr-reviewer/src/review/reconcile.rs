//! Issue reconciliation across PR versions.
//!
//! Merges issues from the previous analysis with fresh LLM findings:
//! id-matched issues keep their original reason and suggested fix, a
//! previously resolved issue is never reopened, and previous issues the LLM
//! did not mention are carried forward unchanged. Also hosts the
//! cross-batch dedup pass (Stage 1.X) and the previous-issues prompt
//! section builder.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::model::issue::{Category, ReviewIssue, Severity};
use crate::model::request::{PreviousIssue, ReviewRequest};
use crate::similarity::is_semantically_similar;

/// Whether a previous issue belongs to any of the given file paths.
///
/// Matches on exact path or when one path is a suffix of the other; never
/// on basename alone, which would conflate same-named files in different
/// directories.
pub fn issue_matches_files(issue: &PreviousIssue, file_paths: &[String]) -> bool {
    let Some(issue_file) = issue.file.as_deref().filter(|f| !f.is_empty()) else {
        return false;
    };
    file_paths.iter().any(|fp| {
        issue_file == fp
            || issue_file.ends_with(&format!("/{fp}"))
            || fp.ends_with(&format!("/{issue_file}"))
    })
}

/// Fingerprint of a previous issue, aligned with
/// [`ReviewIssue::fingerprint`]: `file :: line/3 :: severity :: reason[..50]`.
fn previous_fingerprint(issue: &PreviousIssue) -> String {
    let line_group = issue.line.unwrap_or(0) / 3;
    let severity = issue.severity.as_deref().unwrap_or("");
    let reason = issue.reason.as_deref().unwrap_or("");
    let reason_prefix: String = reason.chars().take(50).collect();
    format!(
        "{}::{}::{}::{}",
        issue.file.as_deref().unwrap_or(""),
        line_group,
        severity.to_uppercase(),
        reason_prefix.to_lowercase().trim()
    )
}

/// Deduplicate previous issues by fingerprint before prompting.
///
/// Newer PR versions win; at equal versions the resolved copy wins. When a
/// newer unresolved copy replaces an older resolved one, the resolution
/// metadata is carried over so the issue stays resolved.
pub fn deduplicate_previous(issues: &[PreviousIssue]) -> Vec<PreviousIssue> {
    let mut deduped: HashMap<String, PreviousIssue> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for issue in issues {
        let fp = previous_fingerprint(issue);
        match deduped.get_mut(&fp) {
            None => {
                order.push(fp.clone());
                deduped.insert(fp, issue.clone());
            }
            Some(existing) => {
                let existing_version = existing.pr_version.unwrap_or(0);
                let current_version = issue.pr_version.unwrap_or(0);

                if current_version > existing_version {
                    let mut replacement = issue.clone();
                    if existing.is_resolved() && !replacement.is_resolved() {
                        replacement.status = Some("resolved".to_string());
                        replacement.resolution_explanation =
                            existing.resolution_explanation.clone();
                        replacement.resolved_in_commit = existing.resolved_in_commit.clone();
                        replacement.resolved_in_pr_version = existing.resolved_in_pr_version;
                    }
                    *existing = replacement;
                } else if current_version == existing_version
                    && issue.is_resolved()
                    && !existing.is_resolved()
                {
                    *existing = issue.clone();
                }
            }
        }
    }

    order.into_iter().filter_map(|fp| deduped.remove(&fp)).collect()
}

/// Render the previous-issues section of a Stage-1 prompt.
///
/// Deduplicates first, then lists OPEN issues (to re-check) and RESOLVED
/// issues (context only) with explicit instructions about `isResolved`
/// booleans and id reuse.
pub fn format_previous_issues_for_batch(issues: &[PreviousIssue]) -> String {
    if issues.is_empty() {
        return String::new();
    }

    let deduped = deduplicate_previous(issues);
    let (resolved, open): (Vec<&PreviousIssue>, Vec<&PreviousIssue>) =
        deduped.iter().partition(|i| i.is_resolved());

    let mut lines = vec![
        "=== PREVIOUS ISSUES HISTORY (check if resolved/persisting) ===".to_string(),
        "Issues have been deduplicated. Only check OPEN issues - RESOLVED ones are for context only."
            .to_string(),
        String::new(),
    ];

    if !open.is_empty() {
        lines.push("--- OPEN ISSUES (check if now fixed) ---".to_string());
        for issue in &open {
            lines.push(format!(
                "[ID:{}] {} @ {}:{} (v{})",
                issue.id.as_deref().unwrap_or("unknown"),
                issue.severity.as_deref().unwrap_or("MEDIUM"),
                issue.file.as_deref().unwrap_or("unknown"),
                issue.line.map(|l| l.to_string()).unwrap_or_else(|| "?".into()),
                issue.pr_version.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
            ));
            lines.push(format!(
                "  Issue: {}",
                issue.reason.as_deref().unwrap_or("No description")
            ));
            lines.push(String::new());
        }
    }

    if !resolved.is_empty() {
        lines.push("--- RESOLVED ISSUES (for context only, do NOT re-report) ---".to_string());
        for issue in &resolved {
            lines.push(format!(
                "[ID:{}] {} @ {}:{} (v{}) - RESOLVED",
                issue.id.as_deref().unwrap_or("unknown"),
                issue.severity.as_deref().unwrap_or("MEDIUM"),
                issue.file.as_deref().unwrap_or("unknown"),
                issue.line.map(|l| l.to_string()).unwrap_or_else(|| "?".into()),
                issue.pr_version.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
            ));
            if let Some(explanation) = issue.resolution_explanation.as_deref() {
                lines.push(format!("  Resolution: {explanation}"));
            }
            if let Some(v) = issue.resolved_in_pr_version {
                lines.push(format!("  Resolved in: v{v}"));
            }
            lines.push(format!(
                "  Original issue: {}",
                issue.reason.as_deref().unwrap_or("No description")
            ));
            lines.push(String::new());
        }
    }

    lines.extend(
        [
            "INSTRUCTIONS:",
            "- For OPEN issues that are now FIXED: report with 'isResolved': true (boolean)",
            "- For OPEN issues still present: report with 'isResolved': false (boolean)",
            "- Do NOT re-report RESOLVED issues - they are only shown for context",
            "- IMPORTANT: 'isResolved' MUST be a JSON boolean (true/false), not a string",
            "- Preserve the 'id' field for all issues you report from previous issues",
            "- CRITICAL: do NOT create a NEW issue (with a new ID or no ID) for a problem already covered by an OPEN previous issue. Reuse the existing 'id'.",
            "=== END PREVIOUS ISSUES ===",
        ]
        .map(String::from),
    );

    lines.join("\n")
}

/// Cross-batch dedup (Stage 1.X): suppress issues whose reason is at least
/// `threshold` similar to an already-accepted issue. First accepted wins.
pub fn deduplicate_cross_batch(issues: Vec<ReviewIssue>, threshold: f64) -> Vec<ReviewIssue> {
    let mut deduped: Vec<ReviewIssue> = Vec::new();
    for issue in issues {
        let duplicate = deduped
            .iter()
            .any(|existing| is_semantically_similar(&issue.reason, &existing.reason, threshold));
        if duplicate {
            info!(reason = %truncate(&issue.reason, 50), "cross-batch dedup suppressed issue");
        } else {
            deduped.push(issue);
        }
    }
    deduped
}

/// Reconcile previous issues with new findings.
///
/// Invariants:
/// - a previously resolved issue is never reopened;
/// - merged issues preserve the previous reason, suggested-fix description,
///   and suggested-fix diff (the LLM's text goes to the resolution
///   explanation only on a transition to resolved);
/// - unmatched previous issues carry forward unchanged.
pub fn reconcile_previous_issues(
    request: &ReviewRequest,
    new_issues: Vec<ReviewIssue>,
    cfg: &OrchestratorConfig,
) -> Vec<ReviewIssue> {
    if request.previous_code_analysis_issues.is_empty() {
        return new_issues;
    }

    info!(
        previous = request.previous_code_analysis_issues.len(),
        new = new_issues.len(),
        "reconciling previous issues with new findings"
    );

    let current_commit = request.resolution_commit().map(str::to_string);

    let prev_by_id: HashMap<String, &PreviousIssue> = request
        .previous_code_analysis_issues
        .iter()
        .filter_map(|p| p.id.clone().map(|id| (id, p)))
        .collect();

    let mut reconciled: Vec<ReviewIssue> = Vec::new();
    let mut processed_prev_ids: HashSet<String> = HashSet::new();

    for new_issue in &new_issues {
        let mut issue_id = new_issue.id.clone();

        // Adopt an OPEN previous issue's id on a same-file semantic match.
        if issue_id.is_none() {
            for (prev_id, prev) in &prev_by_id {
                if prev.is_resolved() {
                    continue;
                }
                if prev.file.as_deref() != Some(new_issue.file.as_str()) {
                    continue;
                }
                let prev_reason = prev.reason.as_deref().unwrap_or("");
                if is_semantically_similar(
                    &new_issue.reason,
                    prev_reason,
                    cfg.id_adoption_similarity,
                ) {
                    debug!(prev_id, "semantic match adopted previous issue id");
                    issue_id = Some(prev_id.clone());
                    break;
                }
            }
        }

        let Some(prev) = issue_id.as_ref().and_then(|id| prev_by_id.get(id)) else {
            reconciled.push(new_issue.clone());
            continue;
        };
        let id = issue_id.clone().unwrap();
        processed_prev_ids.insert(id.clone());

        let prev_was_resolved = prev.is_resolved();
        let llm_says_resolved = new_issue.is_resolved;

        if prev_was_resolved && !llm_says_resolved {
            info!(
                id,
                "not reopening previously resolved issue despite LLM saying isResolved=false"
            );
        }
        let is_resolved = prev_was_resolved || llm_says_resolved;

        // When previously resolved, prior metadata wins; the LLM's text fills
        // in only when no prior explanation exists. On a fresh transition the
        // LLM's reason becomes the explanation.
        let (resolution_explanation, resolved_commit) = if is_resolved && prev_was_resolved {
            (
                prev.resolution_explanation
                    .clone()
                    .or_else(|| llm_says_resolved.then(|| new_issue.reason.clone())),
                prev.resolved_in_commit
                    .clone()
                    .or_else(|| llm_says_resolved.then(|| current_commit.clone()).flatten()),
            )
        } else if is_resolved {
            (Some(new_issue.reason.clone()), current_commit.clone())
        } else {
            (None, None)
        };

        reconciled.push(ReviewIssue {
            id: Some(id),
            severity: Severity::normalize(prev.severity.as_deref().unwrap_or("MEDIUM")),
            category: Category::normalize(prev.category.as_deref().unwrap_or("CODE_QUALITY")),
            file: prev
                .file
                .clone()
                .unwrap_or_else(|| new_issue.file.clone()),
            line: prev
                .line
                .map(|l| l.to_string())
                .unwrap_or_else(|| new_issue.line.clone()),
            reason: prev.reason.clone().unwrap_or_default(),
            suggested_fix_description: prev.suggested_fix_description.clone().unwrap_or_default(),
            suggested_fix_diff: prev.suggested_fix_diff.clone(),
            is_resolved,
            resolution_explanation,
            resolved_in_commit: resolved_commit,
            visibility: prev.visibility.clone(),
            code_snippet: prev.code_snippet.clone(),
        });
    }

    // Carry forward previous issues the LLM did not mention.
    for prev in &request.previous_code_analysis_issues {
        if let Some(id) = &prev.id {
            if processed_prev_ids.contains(id) {
                continue;
            }
        }

        let prev_file = prev.file.as_deref().unwrap_or("");
        let prev_line = prev.line.map(|l| l.to_string());
        let already_reported = new_issues.iter().any(|n| {
            n.file == prev_file && prev_line.as_deref() == Some(n.line.as_str())
        });
        if already_reported {
            continue;
        }

        let was_resolved = prev.is_resolved();
        if was_resolved {
            info!(
                id = prev.id.as_deref().unwrap_or("-"),
                "preserving resolved status of carried-forward issue"
            );
        }

        reconciled.push(ReviewIssue {
            id: prev.id.clone(),
            severity: Severity::normalize(prev.severity.as_deref().unwrap_or("MEDIUM")),
            category: Category::normalize(prev.category.as_deref().unwrap_or("CODE_QUALITY")),
            file: prev_file.to_string(),
            line: prev_line.unwrap_or_else(|| "1".to_string()),
            reason: prev.reason.clone().unwrap_or_default(),
            suggested_fix_description: prev.suggested_fix_description.clone().unwrap_or_default(),
            suggested_fix_diff: prev.suggested_fix_diff.clone(),
            is_resolved: was_resolved,
            resolution_explanation: was_resolved
                .then(|| prev.resolution_explanation.clone())
                .flatten(),
            resolved_in_commit: was_resolved.then(|| prev.resolved_in_commit.clone()).flatten(),
            visibility: prev.visibility.clone(),
            code_snippet: prev.code_snippet.clone(),
        });
    }

    let resolved_kept = reconciled.iter().filter(|i| i.is_resolved).count();
    info!(
        total = reconciled.len(),
        resolved_kept, "reconciliation complete"
    );
    reconciled
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        return s.to_string();
    }
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn previous(id: &str, file: &str, line: i64, status: &str) -> PreviousIssue {
        PreviousIssue {
            id: Some(id.to_string()),
            severity: Some("HIGH".to_string()),
            category: Some("SECURITY".to_string()),
            file: Some(file.to_string()),
            line: Some(line),
            reason: Some("Hardcoded credentials in config loader".to_string()),
            suggested_fix_description: Some("Move to env".to_string()),
            suggested_fix_diff: Some("--- a\n+++ b\n@@ -1 +1 @@\n-x\n+y".to_string()),
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    fn request_with(previous_issues: Vec<PreviousIssue>) -> ReviewRequest {
        ReviewRequest {
            previous_code_analysis_issues: previous_issues,
            current_commit_hash: Some("abc123".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn resolved_issue_stays_resolved() {
        // Scenario: previous issue 42 is resolved; the LLM re-reports it
        // with isResolved=false. The merged issue must stay resolved with
        // the original reason.
        let request = request_with(vec![previous("42", "a.py", 10, "resolved")]);
        let llm_issue = ReviewIssue {
            id: Some("42".to_string()),
            file: "a.py".to_string(),
            line: "12".to_string(),
            reason: "LLM thinks it is still broken".to_string(),
            is_resolved: false,
            ..Default::default()
        };

        let out = reconcile_previous_issues(&request, vec![llm_issue], &Default::default());
        assert_eq!(out.len(), 1);
        assert!(out[0].is_resolved);
        assert_eq!(out[0].reason, "Hardcoded credentials in config loader");
        assert_eq!(out[0].id.as_deref(), Some("42"));
    }

    #[test]
    fn merged_issue_preserves_previous_fix_data() {
        let request = request_with(vec![previous("7", "b.py", 5, "open")]);
        let llm_issue = ReviewIssue {
            id: Some("7".to_string()),
            file: "b.py".to_string(),
            reason: "Different wording from the LLM".to_string(),
            suggested_fix_description: "LLM's own fix".to_string(),
            is_resolved: false,
            ..Default::default()
        };

        let out = reconcile_previous_issues(&request, vec![llm_issue], &Default::default());
        assert_eq!(out[0].suggested_fix_description, "Move to env");
        assert!(out[0].suggested_fix_diff.is_some());
        assert!(!out[0].is_resolved);
        assert!(out[0].resolution_explanation.is_none());
    }

    #[test]
    fn newly_resolved_issue_gets_llm_explanation_and_commit() {
        let request = request_with(vec![previous("9", "c.py", 3, "open")]);
        let llm_issue = ReviewIssue {
            id: Some("9".to_string()),
            file: "c.py".to_string(),
            reason: "The credential was moved to an env var".to_string(),
            is_resolved: true,
            ..Default::default()
        };

        let out = reconcile_previous_issues(&request, vec![llm_issue], &Default::default());
        assert!(out[0].is_resolved);
        assert_eq!(
            out[0].resolution_explanation.as_deref(),
            Some("The credential was moved to an env var")
        );
        assert_eq!(out[0].resolved_in_commit.as_deref(), Some("abc123"));
    }

    #[test]
    fn id_adoption_by_semantic_similarity() {
        let request = request_with(vec![previous("11", "d.py", 8, "open")]);
        let llm_issue = ReviewIssue {
            id: None,
            file: "d.py".to_string(),
            reason: "Hardcoded credentials in config loader.".to_string(),
            ..Default::default()
        };

        let out = reconcile_previous_issues(&request, vec![llm_issue], &Default::default());
        assert_eq!(out[0].id.as_deref(), Some("11"));
    }

    #[test]
    fn unmatched_previous_issue_carries_forward() {
        let request = request_with(vec![previous("20", "e.py", 15, "open")]);
        let unrelated = ReviewIssue {
            file: "other.py".to_string(),
            reason: "Totally different thing".to_string(),
            ..Default::default()
        };

        let out = reconcile_previous_issues(&request, vec![unrelated], &Default::default());
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|i| i.id.as_deref() == Some("20") && !i.is_resolved));
    }

    #[test]
    fn cross_batch_dedup_keeps_first() {
        let a = ReviewIssue {
            reason: "Hardcoded database credentials in module X".to_string(),
            file: "x.py".to_string(),
            ..Default::default()
        };
        let b = ReviewIssue {
            reason: "Hardcoded database credentials in module X".to_string(),
            file: "y.py".to_string(),
            ..Default::default()
        };
        let out = deduplicate_cross_batch(vec![a, b], 0.75);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].file, "x.py");
    }

    #[test]
    fn previous_dedup_prefers_resolved_at_same_version() {
        let mut open_copy = previous("1", "f.py", 9, "open");
        open_copy.pr_version = Some(2);
        let mut resolved_copy = previous("1", "f.py", 9, "resolved");
        resolved_copy.pr_version = Some(2);

        let deduped = deduplicate_previous(&[open_copy, resolved_copy]);
        assert_eq!(deduped.len(), 1);
        assert!(deduped[0].is_resolved());
    }

    #[test]
    fn prompt_section_separates_open_and_resolved() {
        let issues = vec![
            previous("1", "a.py", 1, "open"),
            previous("2", "b.py", 99, "resolved"),
        ];
        let text = format_previous_issues_for_batch(&issues);
        assert!(text.contains("--- OPEN ISSUES"));
        assert!(text.contains("--- RESOLVED ISSUES"));
        assert!(text.contains("[ID:1]"));
        assert!(text.contains("[ID:2]"));
        assert!(text.contains("Reuse the existing 'id'"));
    }
}
