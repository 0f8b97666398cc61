//! Prompt assembly for every pipeline stage.
//!
//! Templates are kept here so stage modules stay orchestration-only. Each
//! structured stage also carries a compact JSON schema string used by the
//! repair loop in `structured`.

use crate::graph::BatchItem;
use crate::model::plan::Priority;

/// Per-file material for a Stage-1 batch prompt.
pub struct BatchFileContext {
    pub path: String,
    pub change_type: String,
    pub focus_areas: Vec<String>,
    pub diff: String,
}

/// Stage-0 planning prompt.
pub fn build_stage0_prompt(
    repo_slug: &str,
    pr_id: &str,
    pr_title: &str,
    target_branch: &str,
    commit_hash: &str,
    changed_files_json: &str,
) -> String {
    format!(
        r#"You are the planning stage of a multi-stage AI code review pipeline.

Repository: {repo_slug}
Pull request: #{pr_id} "{pr_title}"
Target branch: {target_branch}
Commit: {commit_hash}

Changed files (path, change type, approximate line counts):
{changed_files_json}

Your tasks:
1. Classify every changed file into priority groups (CRITICAL, HIGH, MEDIUM, LOW) by review urgency. Business logic, security-sensitive code, and data handling rank higher than docs and config.
2. For each file, list the focus areas a reviewer should concentrate on and a risk level.
3. List files that can be skipped from deep review, with reasons.
4. Write cross-file hypotheses worth verifying once per-file review is done (contract drift between files, shared state, data flow gaps).

Respond with ONLY a JSON object matching this structure:
{{
  "analysis_summary": "one paragraph overview",
  "file_groups": [
    {{
      "group_id": "short-id",
      "priority": "CRITICAL|HIGH|MEDIUM|LOW",
      "rationale": "why these files are grouped at this priority",
      "files": [{{"path": "...", "focus_areas": ["..."], "risk_level": "CRITICAL|HIGH|MEDIUM|LOW"}}]
    }}
  ],
  "files_to_skip": [{{"path": "...", "reason": "..."}}],
  "cross_file_concerns": ["hypothesis 1", "hypothesis 2"]
}}

Every changed file must appear in exactly one group or in files_to_skip. No markdown, no commentary."#
    )
}

/// Stage-1 batch review prompt.
#[allow(clippy::too_many_arguments)]
pub fn build_stage1_batch_prompt(
    files: &[BatchFileContext],
    priority: Priority,
    rag_context: &str,
    is_incremental: bool,
    previous_issues: &str,
    all_pr_files: &[String],
    deleted_files: &[String],
    tool_section: Option<&str>,
) -> String {
    let mut files_context = String::new();
    let diff_label = if is_incremental {
        "Delta Diff (NEW CHANGES ONLY)"
    } else {
        "Diff"
    };
    for (i, f) in files.iter().enumerate() {
        files_context.push_str(&format!(
            "\n---\nFILE #{}: {}\nType: {}\nFocus Areas: {}\n\n{}:\n{}\n---\n",
            i + 1,
            f.path,
            f.change_type,
            f.focus_areas.join(", "),
            diff_label,
            if f.diff.is_empty() {
                "(Diff unavailable)"
            } else {
                &f.diff
            },
        ));
    }

    let incremental_instructions = if is_incremental {
        "\n## INCREMENTAL REVIEW MODE\nThis is a follow-up review after the PR was updated with new commits.\nThe diff above shows ONLY the changes since the last review. Focus on these NEW changes.\nFor any previous issues listed below, check if they are RESOLVED in the new changes.\n"
    } else {
        ""
    };

    let batch_paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let mut pr_files_context = String::new();
    let other_files: Vec<&String> = all_pr_files
        .iter()
        .filter(|p| !batch_paths.contains(&p.as_str()))
        .collect();
    if !other_files.is_empty() {
        pr_files_context.push_str(
            "\n## OTHER FILES IN THIS PR (for cross-file awareness)\nThis PR also modifies these files (reviewed in other batches):\n",
        );
        for p in other_files.iter().take(20) {
            pr_files_context.push_str(&format!("- {p}\n"));
        }
        if other_files.len() > 20 {
            pr_files_context.push_str(&format!("... and {} more files\n", other_files.len() - 20));
        }
        pr_files_context
            .push_str("Consider potential interactions with these files when reviewing.\n");
    }

    let mut deleted_files_context = String::new();
    if !deleted_files.is_empty() {
        deleted_files_context.push_str(
            "\n## FILES BEING DELETED IN THIS PR\nThe following files are being DELETED in this PR. Any retrieved context referencing them is STALE.\nDo NOT flag duplication or conflicts with code from these files:\n",
        );
        for p in deleted_files.iter().take(30) {
            deleted_files_context.push_str(&format!("- {p}\n"));
        }
        if deleted_files.len() > 30 {
            deleted_files_context.push_str(&format!("... and {} more\n", deleted_files.len() - 30));
        }
    }

    let rag_block = if rag_context.is_empty() {
        "(No additional codebase context available)"
    } else {
        rag_context
    };

    let mut prompt = format!(
        r#"You are the per-file review stage of a multi-stage AI code review pipeline.
Review the following batch of files (batch priority: {priority}).
{incremental_instructions}
## FILES TO REVIEW
{files_context}
## RELATED CODEBASE CONTEXT (read-only, retrieved by similarity)
{rag_block}
{pr_files_context}{deleted_files_context}
{previous_issues}

For each file, report concrete issues: security problems, bug risks, performance traps, error-handling gaps, and quality concerns visible in the changed lines. Use the retrieved context to avoid flagging symbols that exist elsewhere. Line numbers refer to the NEW version of the file.

Respond with ONLY a JSON object matching this structure:
{{
  "reviews": [
    {{
      "file": "path",
      "analysis_summary": "short summary",
      "issues": [
        {{
          "id": "previous issue id when re-reporting, otherwise omit",
          "severity": "HIGH|MEDIUM|LOW|INFO",
          "category": "SECURITY|PERFORMANCE|CODE_QUALITY|BUG_RISK|STYLE|DOCUMENTATION|BEST_PRACTICES|ERROR_HANDLING|TESTING|ARCHITECTURE",
          "file": "path",
          "line": "42 or 42-45, as a string",
          "reason": "clear explanation",
          "suggestedFixDescription": "how to fix it",
          "suggestedFixDiff": "optional unified diff",
          "isResolved": false
        }}
      ],
      "confidence": "HIGH|MEDIUM|LOW",
      "note": ""
    }}
  ]
}}

No markdown fences, no commentary outside the JSON."#,
        priority = priority.as_str(),
    );

    if let Some(section) = tool_section {
        prompt.push_str(section);
    }
    prompt
}

/// Tool instructions appended to Stage-1 prompts when tools are enabled.
pub fn stage1_tool_section(max_calls: usize, target_branch: &str) -> String {
    format!(
        r#"

## AVAILABLE TOOLS
When the diff alone is not enough (a symbol you cannot see, truncated context), you may call:
- getBranchFileContent(branch, filePath): read a file's content from branch "{target_branch}".
You have a budget of {max_calls} tool calls for this batch. Use them only to close real context gaps, then produce the final JSON."#
    )
}

/// Verification tool instructions appended to Stage-3 prompts.
pub fn stage3_verification_section(max_calls: usize, target_branch: &str, pr_id: &str) -> String {
    format!(
        r#"

## VERIFICATION TOOLS
Before finalizing, you may verify uncertain findings:
- getBranchFileContent(branch, filePath): read a file from branch "{target_branch}".
- getPullRequestComments(pullRequestId): read discussion on PR "{pr_id}".
You have a budget of {max_calls} tool calls. Use them sparingly, then produce the final report."#
    )
}

/// Stage-2 cross-file analysis prompt.
pub fn build_stage2_prompt(
    repo_slug: &str,
    pr_title: &str,
    commit_hash: &str,
    stage1_findings_json: &str,
    cross_file_concerns: &[String],
) -> String {
    let concerns_text: String = cross_file_concerns
        .iter()
        .map(|c| format!("- {c}\n"))
        .collect();

    format!(
        r#"You are the cross-file analysis stage of a multi-stage AI code review pipeline.

Repository: {repo_slug}
Pull request: "{pr_title}" at commit {commit_hash}

## HYPOTHESES FROM PLANNING
{concerns_text}
## PER-FILE FINDINGS (Stage 1, deduplicated)
{stage1_findings_json}

Analyze architecture-level concerns that span files: contract drift, data flow gaps between producers and consumers, shared-state hazards, migration/schema integrity. Only report what the evidence supports.

Respond with ONLY a JSON object matching this structure:
{{
  "pr_risk_level": "CRITICAL|HIGH|MEDIUM|LOW",
  "cross_file_issues": [
    {{
      "id": "xf-1",
      "severity": "HIGH|MEDIUM|LOW",
      "category": "ARCHITECTURE|BUG_RISK|SECURITY|...",
      "title": "...",
      "affected_files": ["..."],
      "description": "...",
      "evidence": "...",
      "suggestion": "..."
    }}
  ],
  "data_flow_concerns": [{{"flow": "...", "gap": "...", "files_involved": ["..."], "severity": "..."}}],
  "immutability_enforcement": null,
  "database_integrity": null,
  "pr_recommendation": "APPROVE|REQUEST_CHANGES|COMMENT",
  "confidence": "HIGH|MEDIUM|LOW"
}}

No markdown, no commentary."#
    )
}

/// Stage-3 aggregation prompt. Returns free-form markdown.
#[allow(clippy::too_many_arguments)]
pub fn build_stage3_prompt(
    repo_slug: &str,
    pr_id: &str,
    pr_title: &str,
    total_files: usize,
    additions: usize,
    deletions: usize,
    stage0_plan_json: &str,
    stage1_issues_json: &str,
    stage2_findings_json: &str,
    recommendation: &str,
    incremental_context: &str,
    tool_section: Option<&str>,
) -> String {
    let mut prompt = format!(
        r#"You are the report stage of a multi-stage AI code review pipeline.
Write the final review comment for this pull request as well-formatted markdown.

Repository: {repo_slug}
Pull request: #{pr_id} "{pr_title}"
Scope: {total_files} files changed, +{additions}/-{deletions} lines.
{incremental_context}
## REVIEW PLAN (Stage 0)
{stage0_plan_json}

## PER-FILE ISSUES (Stage 1, reconciled)
{stage1_issues_json}

## CROSS-FILE ANALYSIS (Stage 2)
{stage2_findings_json}

Recommendation from cross-file analysis: {recommendation}

Structure the report as:
1. A short executive summary of the PR and the overall assessment.
2. Key findings grouped by severity, referencing file and line.
3. Cross-file and architectural observations.
4. A closing recommendation.

Be specific and concise; do not invent findings that are not in the data above. Return ONLY the markdown report."#
    );

    if let Some(section) = tool_section {
        prompt.push_str(section);
    }
    prompt
}

/// Incremental summary prefix for Stage 3.
pub fn incremental_context_block(
    previous_count: usize,
    resolved_count: usize,
    new_count: usize,
    total: usize,
) -> String {
    format!(
        r#"
## INCREMENTAL REVIEW SUMMARY
- Previous issues from last review: {previous_count}
- Issues resolved in this update: {resolved_count}
- New issues found in delta: {new_count}
- Total issues after reconciliation: {total}
"#
    )
}

/// JSON repair prompt used by the structured-output driver.
pub fn build_repair_prompt(broken_json: &str, error: &str, schema: &str) -> String {
    format!(
        r#"You are a JSON repair expert.
The following JSON failed to parse/validate:
Error: {error}

Broken JSON:
{broken_json}

Required Schema (the output MUST be a JSON object, not an array):
{schema}

CRITICAL INSTRUCTIONS:
1. Return ONLY the fixed valid JSON object
2. The response MUST start with {{ and end with }}
3. All property names MUST be enclosed in double quotes
4. No markdown code blocks (no ```)
5. No explanatory text before or after the JSON
6. Ensure all required fields from the schema are present

Output the corrected JSON object now:"#
    )
}

/// Verification-agent prompt (Stage 1.5).
pub fn build_verification_prompt(issues_block: &str) -> String {
    format!(
        r#"You are a verification agent for a code review system.
Your job is to check whether the following issues are false positives caused by diff-blindness: a reviewer seeing only the diff assumed a symbol or import is missing when it exists elsewhere in the file.

You have one tool: searchFileContent(filePath, searchString).
For each issue below, extract the symbol claimed to be missing and search for it in the named file.
If the tool reports Found, the issue is a FALSE POSITIVE and must be dropped.
If the tool reports Not Found, the issue is real and must be kept.

Issues to verify:
{issues_block}

When you are done, respond with ONLY a JSON object: {{"issue_ids_to_drop": ["id1", "id2"]}}"#
    )
}

/// Rows for the Stage-0 prompt's changed-file table.
pub fn changed_files_rows(
    rows: &[(String, String, Option<usize>, Option<usize>)],
) -> String {
    let entries: Vec<serde_json::Value> = rows
        .iter()
        .map(|(path, change_type, adds, dels)| {
            serde_json::json!({
                "path": path,
                "type": change_type,
                "lines_added": adds.map(|n| n.to_string()).unwrap_or_else(|| "?".into()),
                "lines_deleted": dels.map(|n| n.to_string()).unwrap_or_else(|| "?".into()),
            })
        })
        .collect();
    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
}

/// Batch items to prompt file contexts, using the given per-file diff lookup.
pub fn batch_file_contexts<'a, F>(batch: &'a [BatchItem], mut diff_for: F) -> Vec<BatchFileContext>
where
    F: FnMut(&'a str) -> Option<(String, String)>,
{
    batch
        .iter()
        .map(|item| {
            let (diff, change_type) = diff_for(item.file.path.as_str())
                .unwrap_or_else(|| (String::new(), "MODIFIED".to_string()));
            BatchFileContext {
                path: item.file.path.clone(),
                change_type,
                focus_areas: item.file.focus_areas.clone(),
                diff,
            }
        })
        .collect()
}

/* ------------------------- schema strings ------------------------- */

pub const REVIEW_PLAN_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["analysis_summary", "file_groups"],
  "properties": {
    "analysis_summary": {"type": "string"},
    "file_groups": {"type": "array", "items": {
      "type": "object",
      "required": ["group_id", "priority", "files"],
      "properties": {
        "group_id": {"type": "string"},
        "priority": {"enum": ["CRITICAL", "HIGH", "MEDIUM", "LOW"]},
        "rationale": {"type": "string"},
        "files": {"type": "array", "items": {
          "type": "object",
          "required": ["path"],
          "properties": {
            "path": {"type": "string"},
            "focus_areas": {"type": "array", "items": {"type": "string"}},
            "risk_level": {"type": "string"}
          }
        }}
      }
    }},
    "files_to_skip": {"type": "array", "items": {
      "type": "object",
      "properties": {"path": {"type": "string"}, "reason": {"type": "string"}}
    }},
    "cross_file_concerns": {"type": "array", "items": {"type": "string"}}
  }
}"#;

pub const FILE_REVIEW_BATCH_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["reviews"],
  "properties": {
    "reviews": {"type": "array", "items": {
      "type": "object",
      "required": ["file", "issues"],
      "properties": {
        "file": {"type": "string"},
        "analysis_summary": {"type": "string"},
        "issues": {"type": "array", "items": {
          "type": "object",
          "required": ["severity", "category", "file", "line", "reason"],
          "properties": {
            "id": {"type": "string"},
            "severity": {"enum": ["HIGH", "MEDIUM", "LOW", "INFO"]},
            "category": {"type": "string"},
            "file": {"type": "string"},
            "line": {"type": "string"},
            "reason": {"type": "string"},
            "suggestedFixDescription": {"type": "string"},
            "suggestedFixDiff": {"type": ["string", "null"]},
            "isResolved": {"type": "boolean"}
          }
        }},
        "confidence": {"type": "string"},
        "note": {"type": "string"}
      }
    }}
  }
}"#;

pub const CROSS_FILE_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["pr_risk_level", "cross_file_issues", "pr_recommendation"],
  "properties": {
    "pr_risk_level": {"type": "string"},
    "cross_file_issues": {"type": "array"},
    "data_flow_concerns": {"type": "array"},
    "immutability_enforcement": {"type": ["object", "null"]},
    "database_integrity": {"type": ["object", "null"]},
    "pr_recommendation": {"type": "string"},
    "confidence": {"type": "string"}
  }
}"#;

pub const VERIFICATION_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["issue_ids_to_drop"],
  "properties": {
    "issue_ids_to_drop": {"type": "array", "items": {"type": "string"}}
  }
}"#;
