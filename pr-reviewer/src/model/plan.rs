//! Structured stage outputs: the Stage-0 plan, Stage-1 batch reviews, and
//! the Stage-2 cross-file analysis.
//!
//! These deserialize from schema-constrained LLM output, so every field the
//! model might omit carries a default.

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::issue::ReviewIssue;

/// Review priority for a file group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Priority {
    #[serde(rename = "CRITICAL")]
    Critical,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
}

impl Priority {
    /// Lenient parse; unrecognized values become `Medium`.
    pub fn normalize(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Self::Critical,
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            "LOW" => Self::Low,
            _ => Self::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    /// Rank for ordering; lower is more urgent.
    pub fn rank(&self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::normalize(v.as_str().unwrap_or("")))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// File details for review planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewFile {
    pub path: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub risk_level: String,
}

/// Group of files to be reviewed together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileGroup {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub files: Vec<ReviewFile>,
}

/// File skipped from deep review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileToSkip {
    pub path: String,
    #[serde(default)]
    pub reason: String,
}

/// Stage-0 output: the review plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewPlan {
    #[serde(default)]
    pub analysis_summary: String,
    #[serde(default)]
    pub file_groups: Vec<FileGroup>,
    #[serde(default)]
    pub files_to_skip: Vec<FileToSkip>,
    /// Hypotheses to verify in Stage 2.
    #[serde(default)]
    pub cross_file_concerns: Vec<String>,
}

impl ReviewPlan {
    /// All planned file paths across groups.
    pub fn planned_paths(&self) -> Vec<&str> {
        self.file_groups
            .iter()
            .flat_map(|g| g.files.iter().map(|f| f.path.as_str()))
            .collect()
    }

    /// Total planned file count.
    pub fn file_count(&self) -> usize {
        self.file_groups.iter().map(|g| g.files.len()).sum()
    }
}

/// Stage-1 output: single-file review result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileReviewOutput {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub analysis_summary: String,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub confidence: String,
    #[serde(default)]
    pub note: String,
}

/// Stage-1 output: batch of file reviews.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileReviewBatchOutput {
    #[serde(default)]
    pub reviews: Vec<FileReviewOutput>,
}

/// Flat review output: summary comment plus issue list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeReviewOutput {
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

/// Issue spanning multiple files (Stage 2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossFileIssue {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Stage 2: data flow gap analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataFlowConcern {
    #[serde(default)]
    pub flow: String,
    #[serde(default)]
    pub gap: String,
    #[serde(default)]
    pub files_involved: Vec<String>,
    #[serde(default)]
    pub severity: String,
}

/// Stage 2: immutability usage check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImmutabilityCheck {
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub check_pass: bool,
    #[serde(default)]
    pub evidence: String,
}

/// Stage 2: database integrity check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseIntegrityCheck {
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub findings: Vec<String>,
}

/// Stage-2 output: cross-file architectural analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossFileAnalysisResult {
    #[serde(default)]
    pub pr_risk_level: String,
    #[serde(default)]
    pub cross_file_issues: Vec<CrossFileIssue>,
    #[serde(default)]
    pub data_flow_concerns: Vec<DataFlowConcern>,
    #[serde(default)]
    pub immutability_enforcement: Option<ImmutabilityCheck>,
    #[serde(default)]
    pub database_integrity: Option<DatabaseIntegrityCheck>,
    #[serde(default)]
    pub pr_recommendation: String,
    #[serde(default)]
    pub confidence: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical.rank() < Priority::Low.rank());
        assert_eq!(Priority::normalize("weird"), Priority::Medium);
    }

    #[test]
    fn partial_plan_deserializes() {
        let raw = r#"{"analysis_summary": "ok", "file_groups": [{"group_id": "g1", "priority": "HIGH", "files": [{"path": "a.rs"}]}]}"#;
        let plan: ReviewPlan = serde_json::from_str(raw).unwrap();
        assert_eq!(plan.file_count(), 1);
        assert_eq!(plan.planned_paths(), vec!["a.rs"]);
    }
}
