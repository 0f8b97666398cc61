//! Issue post-processing: diff restoration, line-number correction,
//! within-file dedup, and suggested-fix hygiene.
//!
//! Invariants: never creates an issue, never changes an id, never flips
//! `isResolved` from true to false. The whole pass degrades to pass-through
//! when inputs (diff text, file contents, previous issues) are absent, and
//! it is idempotent on its own output.

use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info};

use crate::diff;
use crate::model::issue::{ReviewIssue, Severity};
use crate::model::request::PreviousIssue;
use crate::similarity::sequence_ratio;

/// Similarity threshold for considering two issues duplicates.
const SIMILARITY_THRESHOLD: f64 = 0.75;
/// Maximum line drift the corrector will bridge.
const MAX_LINE_DRIFT: i64 = 15;
/// Sentinel the LLM uses for an absent fix.
const NO_FIX_SENTINEL: &str = "No suggested fix provided";

lazy_static! {
    static ref QUOTED: Regex = Regex::new(r#"['"`]([^'"`]+)['"`]"#).unwrap();
    static ref SNAKE: Regex = Regex::new(r"\b([a-zA-Z][a-z0-9]*(?:_[a-z0-9]+)+)\b").unwrap();
    static ref CAMEL: Regex = Regex::new(r"\b([a-z]+(?:[A-Z][a-z0-9]+)+)\b").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]{2,})\b").unwrap();
}

const DIFF_MARKERS: [&str; 5] = ["---", "+++", "@@", "\n-", "\n+"];

/// Keywords that indicate recurring issue families, used both for line
/// correction and duplicate grouping.
const ISSUE_KEYWORDS: &[&str] = &[
    "hardcode",
    "hardcoded",
    "sql injection",
    "injection",
    "xss",
    "cross-site",
    "authentication",
    "auth bypass",
    "null pointer",
    "null check",
    "memory leak",
    "resource leak",
    "n+1",
    "deprecated",
    "unused",
    "dead code",
    "performance",
    "slow",
    "inefficient",
    "secret",
    "password",
    "api key",
];

/// Full post-processing pass over the final issue list.
pub fn post_process(
    issues: Vec<ReviewIssue>,
    diff_text: Option<&str>,
    file_contents: &HashMap<String, String>,
    previous_issues: &[PreviousIssue],
) -> Vec<ReviewIssue> {
    if issues.is_empty() {
        return issues;
    }
    let before = issues.len();

    let issues = restore_missing_diffs(issues, previous_issues);

    let line_map = diff_text.map(diff::new_line_map).unwrap_or_default();
    let issues: Vec<ReviewIssue> = issues
        .into_iter()
        .map(|i| fix_line_number(i, &line_map, file_contents))
        .collect();

    let issues = merge_duplicate_issues(issues);
    let issues: Vec<ReviewIssue> = issues.into_iter().map(clean_fix_suggestion).collect();

    info!(before, after = issues.len(), "post-processing complete");
    issues
}

/// Restore suggested fixes from previous issues when the LLM dropped them.
///
/// Only unresolved, id-matched issues are touched; the no-fix sentinel and
/// sub-10-char diffs count as missing.
pub fn restore_missing_diffs(
    issues: Vec<ReviewIssue>,
    previous_issues: &[PreviousIssue],
) -> Vec<ReviewIssue> {
    if previous_issues.is_empty() {
        return issues;
    }

    let by_id: HashMap<&str, &PreviousIssue> = previous_issues
        .iter()
        .filter_map(|p| p.id.as_deref().map(|id| (id, p)))
        .collect();

    let mut restored_count = 0usize;
    let issues = issues
        .into_iter()
        .map(|mut issue| {
            let Some(original) = issue
                .id
                .as_deref()
                .filter(|_| !issue.is_resolved)
                .and_then(|id| by_id.get(id))
            else {
                return issue;
            };

            if diff_is_missing(issue.suggested_fix_diff.as_deref()) {
                if let Some(diff) = original
                    .suggested_fix_diff
                    .as_deref()
                    .filter(|d| !diff_is_missing(Some(d)))
                {
                    issue.suggested_fix_diff = Some(diff.to_string());
                    restored_count += 1;
                }
            }
            if issue.suggested_fix_description.trim().is_empty()
                || issue.suggested_fix_description == "No suggested fix description provided"
            {
                if let Some(desc) = original
                    .suggested_fix_description
                    .as_deref()
                    .filter(|d| !d.trim().is_empty())
                {
                    issue.suggested_fix_description = desc.to_string();
                }
            }
            issue
        })
        .collect();

    if restored_count > 0 {
        info!(restored_count, "restored diffs from previous issues");
    }
    issues
}

fn diff_is_missing(diff: Option<&str>) -> bool {
    match diff {
        None => true,
        Some(d) => d.trim().len() < 10 || d == NO_FIX_SENTINEL,
    }
}

/// Correct an issue's line number against the diff map or file contents.
///
/// Candidate lines within ±15 of the reported line are ranked by how many
/// keywords from the issue's reason they contain, minus a 0.1-per-line
/// distance penalty; the argmax wins when positive.
fn fix_line_number(
    issue: ReviewIssue,
    line_map: &HashMap<String, BTreeMap<u32, String>>,
    file_contents: &HashMap<String, String>,
) -> ReviewIssue {
    let Some(reported) = issue.line_number().filter(|l| *l > 0) else {
        return issue;
    };

    let keywords = extract_keywords_from_reason(&issue.reason);
    if keywords.is_empty() {
        return issue;
    }

    let lookup_line = |line_num: i64| -> Option<String> {
        if let Some(lines) = line_map.get(&issue.file) {
            return u32::try_from(line_num)
                .ok()
                .and_then(|n| lines.get(&n).cloned());
        }
        let content = file_contents.get(&issue.file)?;
        let idx = usize::try_from(line_num - 1).ok()?;
        content.lines().nth(idx).map(str::to_string)
    };

    if !line_map.contains_key(&issue.file) && !file_contents.contains_key(&issue.file) {
        return issue;
    }

    let mut best_line = reported;
    let mut best_score = 0.0f64;

    for candidate in (reported - MAX_LINE_DRIFT).max(1)..=(reported + MAX_LINE_DRIFT) {
        let Some(text) = lookup_line(candidate) else {
            continue;
        };
        let lowered = text.to_lowercase();
        let hits = keywords
            .iter()
            .filter(|kw| lowered.contains(&kw.to_lowercase()))
            .count() as f64;
        let score = hits - 0.1 * (candidate - reported).abs() as f64;
        if score > best_score {
            best_score = score;
            best_line = candidate;
        }
    }

    if best_score > 0.0 && best_line != reported {
        debug!(
            file = %issue.file,
            from = reported,
            to = best_line,
            "corrected issue line number"
        );
        let mut corrected = issue;
        corrected.line = best_line.to_string();
        return corrected;
    }
    issue
}

/// Keywords from an issue reason: quoted spans, snake_case and camelCase
/// identifiers, and hardcoded-value digits, capped at ten.
fn extract_keywords_from_reason(reason: &str) -> Vec<String> {
    if reason.is_empty() {
        return Vec::new();
    }

    let mut keywords: Vec<String> = Vec::new();
    let mut push_unique = |s: String| {
        if !s.is_empty() && !keywords.contains(&s) {
            keywords.push(s);
        }
    };

    for caps in QUOTED.captures_iter(reason) {
        push_unique(caps[1].to_string());
    }
    for caps in SNAKE.captures_iter(reason) {
        push_unique(caps[1].to_string());
    }
    for caps in CAMEL.captures_iter(reason) {
        push_unique(caps[1].to_string());
    }

    let lowered = reason.to_lowercase();
    if ISSUE_KEYWORDS.iter().any(|k| lowered.contains(k)) && lowered.contains("hardcode") {
        for caps in Regex::new(r"\b(\d+)\b").unwrap().captures_iter(reason).take(3) {
            push_unique(caps[1].to_string());
        }
    }

    keywords.truncate(10);
    keywords
}

/// Merge semantically similar issues within the same file.
///
/// Similarity is `0.4*keyword_overlap + 0.3*sequence + 0.2*line_proximity
/// + 0.1*category_match`, with proximity decaying linearly to zero over 50
/// lines. A merged cluster keeps the issue with the best non-empty diff,
/// takes the highest severity and the minimum line, and notes the merge
/// when the cluster held distinct insights.
pub fn merge_duplicate_issues(issues: Vec<ReviewIssue>) -> Vec<ReviewIssue> {
    if issues.len() < 2 {
        return issues;
    }

    let mut by_file: BTreeMap<String, Vec<ReviewIssue>> = BTreeMap::new();
    for issue in issues {
        by_file.entry(issue.file.clone()).or_default().push(issue);
    }

    let mut result = Vec::new();
    for (file, file_issues) in by_file {
        if file_issues.len() == 1 {
            result.extend(file_issues);
            continue;
        }

        let mut merged_indices = vec![false; file_issues.len()];
        for i in 0..file_issues.len() {
            if merged_indices[i] {
                continue;
            }
            let mut group = vec![file_issues[i].clone()];
            for j in (i + 1)..file_issues.len() {
                if merged_indices[j] {
                    continue;
                }
                let similarity = issue_similarity(&file_issues[i], &file_issues[j]);
                if similarity >= SIMILARITY_THRESHOLD {
                    group.push(file_issues[j].clone());
                    merged_indices[j] = true;
                }
            }
            if group.len() > 1 {
                info!(file = %file, merged = group.len(), "merged similar issues");
                result.push(merge_issue_group(group));
            } else {
                result.push(group.pop().unwrap());
            }
        }
    }
    result
}

fn issue_similarity(a: &ReviewIssue, b: &ReviewIssue) -> f64 {
    let reason_a = a.reason.to_lowercase();
    let reason_b = b.reason.to_lowercase();

    let keywords_a = core_keywords(&reason_a);
    let keywords_b = core_keywords(&reason_b);
    let keyword_overlap = if !keywords_a.is_empty() && !keywords_b.is_empty() {
        let shared = keywords_a.iter().filter(|k| keywords_b.contains(*k)).count();
        shared as f64 / keywords_a.len().max(keywords_b.len()) as f64
    } else {
        0.0
    };

    let sequence = sequence_ratio(&reason_a, &reason_b);

    let line_proximity = match (a.line_number(), b.line_number()) {
        (Some(la), Some(lb)) => (1.0 - (la - lb).abs() as f64 / 50.0).max(0.0),
        _ => 0.0,
    };

    let category_match = if a.category == b.category { 1.0 } else { 0.0 };

    0.4 * keyword_overlap + 0.3 * sequence + 0.2 * line_proximity + 0.1 * category_match
}

fn core_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = ISSUE_KEYWORDS
        .iter()
        .filter(|k| text.contains(*k))
        .map(|k| k.to_string())
        .collect();
    for caps in IDENTIFIER.captures_iter(text).take(5) {
        let id = caps[1].to_lowercase();
        if !keywords.contains(&id) {
            keywords.push(id);
        }
    }
    keywords
}

fn merge_issue_group(group: Vec<ReviewIssue>) -> ReviewIssue {
    let count = group.len();

    let best_idx = group
        .iter()
        .enumerate()
        .max_by_key(|(_, i)| {
            i.suggested_fix_diff
                .as_deref()
                .filter(|d| is_valid_diff(d))
                .map(str::len)
                .unwrap_or(0)
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    let highest_severity = group
        .iter()
        .map(|i| i.severity)
        .max()
        .unwrap_or(Severity::Medium);

    let min_line = group
        .iter()
        .filter_map(ReviewIssue::line_number)
        .min();

    let distinct_insights: std::collections::BTreeSet<String> = group
        .iter()
        .filter_map(|i| {
            let core: String = i.reason.split('.').next().unwrap_or("").chars().take(100).collect();
            let trimmed = core.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        })
        .collect();

    let mut merged = group.into_iter().nth(best_idx).unwrap();
    merged.severity = highest_severity;
    if let Some(line) = min_line {
        merged.line = line.to_string();
    }
    if distinct_insights.len() > 1 {
        merged.reason = format!(
            "{}\n\nNote: {count} similar instances of this issue were found.",
            merged.reason
        );
    }
    merged
}

/// Diff hygiene: strip markdown fences; a diff without any unified-diff
/// marker is left in place but the issue keeps its fix description only.
fn clean_fix_suggestion(mut issue: ReviewIssue) -> ReviewIssue {
    let Some(diff) = issue.suggested_fix_diff.take() else {
        return issue;
    };

    let cleaned: String = diff
        .lines()
        .filter(|line| {
            let t = line.trim();
            t != "```" && t != "```diff"
        })
        .collect::<Vec<_>>()
        .join("\n");

    issue.suggested_fix_diff = Some(cleaned);
    issue
}

/// Whether a suggested-fix diff looks like an actual diff.
pub fn is_valid_diff(diff: &str) -> bool {
    if diff.trim().len() < 10 || diff == NO_FIX_SENTINEL {
        return false;
    }
    DIFF_MARKERS.iter().any(|m| diff.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::issue::Category;

    fn issue(file: &str, line: &str, reason: &str) -> ReviewIssue {
        ReviewIssue {
            file: file.to_string(),
            line: line.to_string(),
            reason: reason.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn line_correction_moves_to_keyword_match() {
        let diff = "--- a/a.py\n+++ b/a.py\n@@ -1,0 +8,6 @@\n+def setup():\n+    pass\n+\n+def connect():\n+    password = \"hunter2\"\n+    return password";
        let line_map = diff::new_line_map(diff);
        let mut subject = issue("a.py", "9", "Hardcoded `password` value in connect");
        subject = fix_line_number(subject, &line_map, &HashMap::new());
        assert_eq!(subject.line, "12");
    }

    #[test]
    fn line_correction_leaves_unknown_files_alone() {
        let subject = issue("missing.py", "5", "Something with `password`");
        let out = fix_line_number(subject.clone(), &HashMap::new(), &HashMap::new());
        assert_eq!(out.line, subject.line);
    }

    #[test]
    fn duplicates_merge_keeping_best_diff_and_severity() {
        let mut a = issue("a.py", "10", "Hardcoded password in database setup");
        a.severity = Severity::Medium;
        a.suggested_fix_diff = Some("--- a/a.py\n+++ b/a.py\n@@ -10 +10 @@\n-pw\n+env".to_string());
        let mut b = issue("a.py", "12", "Hardcoded password in database setup code");
        b.severity = Severity::High;

        let merged = merge_duplicate_issues(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].severity, Severity::High);
        assert_eq!(merged[0].line, "10");
        assert!(merged[0].suggested_fix_diff.is_some());
    }

    #[test]
    fn different_issues_do_not_merge() {
        let mut a = issue("a.py", "10", "SQL injection in query builder");
        a.category = Category::Security;
        let mut b = issue("a.py", "200", "Missing docstring on public function");
        b.category = Category::Documentation;

        let merged = merge_duplicate_issues(vec![a, b]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn restore_diff_for_unresolved_id_match() {
        let prev = PreviousIssue {
            id: Some("3".to_string()),
            suggested_fix_diff: Some("--- a/x\n+++ b/x\n@@ -1 +1 @@\n-old\n+new".to_string()),
            suggested_fix_description: Some("Use the new API".to_string()),
            ..Default::default()
        };
        let mut subject = issue("x.py", "1", "r");
        subject.id = Some("3".to_string());
        subject.suggested_fix_diff = Some(NO_FIX_SENTINEL.to_string());

        let out = restore_missing_diffs(vec![subject], &[prev]);
        assert!(out[0].suggested_fix_diff.as_deref().unwrap().contains("+new"));
        assert_eq!(out[0].suggested_fix_description, "Use the new API");
    }

    #[test]
    fn resolved_issues_keep_their_empty_diff() {
        let prev = PreviousIssue {
            id: Some("4".to_string()),
            suggested_fix_diff: Some("--- a/x\n+++ b/x\n@@ -1 +1 @@\n-o\n+n".to_string()),
            ..Default::default()
        };
        let mut subject = issue("x.py", "1", "r");
        subject.id = Some("4".to_string());
        subject.is_resolved = true;

        let out = restore_missing_diffs(vec![subject], &[prev]);
        assert!(out[0].suggested_fix_diff.is_none());
    }

    #[test]
    fn fences_are_stripped_from_diffs() {
        let mut subject = issue("a.py", "1", "r");
        subject.suggested_fix_diff =
            Some("```diff\n--- a/a.py\n+++ b/a.py\n@@ -1 +1 @@\n-x\n+y\n```".to_string());
        let out = clean_fix_suggestion(subject);
        let diff = out.suggested_fix_diff.unwrap();
        assert!(!diff.contains("```"));
        assert!(is_valid_diff(&diff));
    }

    #[test]
    fn post_process_is_idempotent() {
        let mut a = issue("a.py", "10", "Hardcoded password in database setup");
        a.suggested_fix_diff = Some("--- a/a.py\n+++ b/a.py\n@@ -10 +10 @@\n-pw\n+env".to_string());
        let b = issue("a.py", "12", "Hardcoded password in database setup code");
        let c = issue("b.py", "3", "Missing null check before dereference");

        let once = post_process(vec![a, b, c], None, &HashMap::new(), &[]);
        let twice = post_process(once.clone(), None, &HashMap::new(), &[]);
        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    #[test]
    fn post_process_never_creates_issues() {
        let issues = vec![
            issue("a.py", "1", "One thing"),
            issue("a.py", "2", "Completely different matter"),
        ];
        let out = post_process(issues.clone(), None, &HashMap::new(), &[]);
        assert!(out.len() <= issues.len());
    }
}
