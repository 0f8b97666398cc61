//! The review request DTO and the previous-issue history it carries.
//!
//! Immutable for the lifetime of the request. Field names carry the wire
//! casing used by the pipeline agent that posts to `/review`.

use serde::{Deserialize, Serialize};

use crate::model::enrichment::PrEnrichmentData;

/// Analysis mode for PR reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AnalysisMode {
    /// Full PR diff analysis (first review or escalation).
    #[default]
    #[serde(rename = "FULL")]
    Full,
    /// Delta diff analysis (subsequent reviews).
    #[serde(rename = "INCREMENTAL")]
    Incremental,
}

/// One issue from a previous analysis version.
///
/// Only the fields reconciliation needs; everything is optional because the
/// backing store predates several of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousIssue {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<i64>,
    /// Issue description.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub suggested_fix_description: Option<String>,
    #[serde(default)]
    pub suggested_fix_diff: Option<String>,
    /// `open`, `resolved`, or `ignored`.
    #[serde(default)]
    pub status: Option<String>,
    /// PR iteration where the issue was found.
    #[serde(default)]
    pub pr_version: Option<i64>,
    #[serde(default, alias = "resolvedDescription")]
    pub resolution_explanation: Option<String>,
    #[serde(default, alias = "resolvedByCommit")]
    pub resolved_in_commit: Option<String>,
    #[serde(default)]
    pub resolved_in_pr_version: Option<i64>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub code_snippet: Option<String>,
}

impl PreviousIssue {
    /// Whether the stored status is `resolved` (case-insensitive).
    pub fn is_resolved(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("resolved"))
            .unwrap_or(false)
    }
}

/// A code review request, as posted by the pipeline agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    #[serde(default)]
    pub project_id: i64,
    /// VCS coordinates used to pre-fill tool calls.
    pub project_vcs_workspace: String,
    pub project_vcs_repo_slug: String,
    /// Retrieval-service coordinates.
    pub project_workspace: String,
    pub project_namespace: String,
    /// AI binding.
    pub ai_provider: String,
    pub ai_model: String,
    pub ai_api_key: String,
    #[serde(default, alias = "branch")]
    pub target_branch_name: Option<String>,
    #[serde(default)]
    pub pull_request_id: Option<i64>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub pr_title: Option<String>,
    #[serde(default)]
    pub pr_description: Option<String>,
    /// Changed file paths from the diff.
    #[serde(default)]
    pub changed_files: Vec<String>,
    /// Full raw unified diff of the PR.
    #[serde(default)]
    pub raw_diff: Option<String>,
    /// Optional per-request token cap.
    #[serde(default)]
    pub max_allowed_tokens: Option<u32>,
    /// Issues from the previous analysis version, if any.
    #[serde(default)]
    pub previous_code_analysis_issues: Vec<PreviousIssue>,
    #[serde(default)]
    pub analysis_mode: AnalysisMode,
    /// Delta diff between previous and current commit (INCREMENTAL only).
    #[serde(default)]
    pub delta_diff: Option<String>,
    #[serde(default)]
    pub previous_commit_hash: Option<String>,
    #[serde(default)]
    pub current_commit_hash: Option<String>,
    /// Pre-computed file contents and dependency relationships.
    #[serde(default)]
    pub enrichment_data: Option<PrEnrichmentData>,
    /// Enable LLM tool calls for context gaps and issue verification.
    #[serde(default)]
    pub use_vcs_tools: bool,
}

impl ReviewRequest {
    /// Incremental mode requires both the flag and a delta diff.
    pub fn is_incremental(&self) -> bool {
        self.analysis_mode == AnalysisMode::Incremental && self.delta_diff.is_some()
    }

    /// Commit used for resolution tracking.
    pub fn resolution_commit(&self) -> Option<&str> {
        self.current_commit_hash
            .as_deref()
            .or(self.commit_hash.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_alias_is_accepted() {
        let raw = r#"{
            "projectVcsWorkspace": "w", "projectVcsRepoSlug": "r",
            "projectWorkspace": "pw", "projectNamespace": "pn",
            "aiProvider": "OPENAI", "aiModel": "m", "aiApiKey": "k",
            "branch": "develop"
        }"#;
        let req: ReviewRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.target_branch_name.as_deref(), Some("develop"));
        assert!(!req.is_incremental());
    }

    #[test]
    fn incremental_needs_delta() {
        let mut req = ReviewRequest {
            analysis_mode: AnalysisMode::Incremental,
            ..Default::default()
        };
        assert!(!req.is_incremental());
        req.delta_diff = Some("diff".into());
        assert!(req.is_incremental());
    }
}
