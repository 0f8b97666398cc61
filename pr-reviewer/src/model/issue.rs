//! Review issue record and ingress sanitation.
//!
//! LLM output is loosely typed; everything lands in the single
//! [`ReviewIssue`] type with normalization applied during deserialization:
//! unknown fields are dropped, invalid severities default to `MEDIUM`,
//! invalid categories to `CODE_QUALITY`, `line` is coerced to a string, and
//! `isResolved` is coerced to a bool.

use serde::{Deserialize, Deserializer, Serialize};

/// Issue severity, uppercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

impl Severity {
    /// Lenient parse; anything unrecognized becomes `Medium`.
    pub fn normalize(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            "LOW" => Self::Low,
            "INFO" => Self::Info,
            _ => Self::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Info => "INFO",
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::normalize(v.as_str().unwrap_or("")))
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

/// Issue category, fixed set, uppercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    #[serde(rename = "SECURITY")]
    Security,
    #[serde(rename = "PERFORMANCE")]
    Performance,
    #[serde(rename = "CODE_QUALITY")]
    CodeQuality,
    #[serde(rename = "BUG_RISK")]
    BugRisk,
    #[serde(rename = "STYLE")]
    Style,
    #[serde(rename = "DOCUMENTATION")]
    Documentation,
    #[serde(rename = "BEST_PRACTICES")]
    BestPractices,
    #[serde(rename = "ERROR_HANDLING")]
    ErrorHandling,
    #[serde(rename = "TESTING")]
    Testing,
    #[serde(rename = "ARCHITECTURE")]
    Architecture,
}

impl Category {
    /// Lenient parse; spaces map to underscores and anything unrecognized
    /// becomes `CodeQuality`.
    pub fn normalize(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().replace(' ', "_").as_str() {
            "SECURITY" => Self::Security,
            "PERFORMANCE" => Self::Performance,
            "CODE_QUALITY" => Self::CodeQuality,
            "BUG_RISK" => Self::BugRisk,
            "STYLE" => Self::Style,
            "DOCUMENTATION" => Self::Documentation,
            "BEST_PRACTICES" => Self::BestPractices,
            "ERROR_HANDLING" => Self::ErrorHandling,
            "TESTING" => Self::Testing,
            "ARCHITECTURE" => Self::Architecture,
            _ => Self::CodeQuality,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "SECURITY",
            Self::Performance => "PERFORMANCE",
            Self::CodeQuality => "CODE_QUALITY",
            Self::BugRisk => "BUG_RISK",
            Self::Style => "STYLE",
            Self::Documentation => "DOCUMENTATION",
            Self::BestPractices => "BEST_PRACTICES",
            Self::ErrorHandling => "ERROR_HANDLING",
            Self::Testing => "TESTING",
            Self::Architecture => "ARCHITECTURE",
        }
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::normalize(v.as_str().unwrap_or("")))
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::CodeQuality
    }
}

/// A single code review issue.
///
/// `line` stays a string because the LLM contract allows `"42"` and
/// `"42-45"`. `id` is carried across PR versions for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    #[serde(default, deserialize_with = "de_opt_string_coerce", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub file: String,
    #[serde(default, deserialize_with = "de_line_string")]
    pub line: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, rename = "suggestedFixDescription")]
    pub suggested_fix_description: String,
    #[serde(default, rename = "suggestedFixDiff", skip_serializing_if = "Option::is_none")]
    pub suggested_fix_diff: Option<String>,
    #[serde(default, rename = "isResolved", deserialize_with = "de_bool_coerce")]
    pub is_resolved: bool,
    #[serde(
        default,
        rename = "resolutionExplanation",
        skip_serializing_if = "Option::is_none"
    )]
    pub resolution_explanation: Option<String>,
    #[serde(default, rename = "resolvedInCommit", skip_serializing_if = "Option::is_none")]
    pub resolved_in_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, rename = "codeSnippet", skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
}

impl Default for ReviewIssue {
    fn default() -> Self {
        Self {
            id: None,
            severity: Severity::Medium,
            category: Category::CodeQuality,
            file: String::new(),
            line: "0".to_string(),
            reason: String::new(),
            suggested_fix_description: String::new(),
            suggested_fix_diff: None,
            is_resolved: false,
            resolution_explanation: None,
            resolved_in_commit: None,
            visibility: None,
            code_snippet: None,
        }
    }
}

impl ReviewIssue {
    /// Numeric start of `line`, handling the `"N-M"` range form.
    pub fn line_number(&self) -> Option<i64> {
        let first = self.line.split('-').next()?.trim();
        first.parse::<i64>().ok()
    }

    /// Fingerprint for cross-version deduplication with a three-line
    /// tolerance band: `file :: line/3 :: severity :: lower(reason[..50])`.
    pub fn fingerprint(&self) -> String {
        let line_group = self.line_number().unwrap_or(0) / 3;
        let reason_prefix: String = self.reason.chars().take(50).collect();
        format!(
            "{}::{}::{}::{}",
            self.file,
            line_group,
            self.severity.as_str(),
            reason_prefix.to_lowercase().trim()
        )
    }
}

/* ---------------------- lenient deserializers ---------------------- */

/// Accepts string, number, or null for `line`; nulls become `"0"`.
fn de_line_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let v = serde_json::Value::deserialize(deserializer)?;
    Ok(match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => "0".to_string(),
    })
}

/// Accepts bool or the strings "true"/"false"; anything else is `false`.
fn de_bool_coerce<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let v = serde_json::Value::deserialize(deserializer)?;
    Ok(match v {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Accepts string or number ids; preserves mapping to backing-store ids.
fn de_opt_string_coerce<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let v = serde_json::Value::deserialize(deserializer)?;
    Ok(match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_json_is_normalized() {
        let raw = r#"{
            "id": 42,
            "severity": "high",
            "category": "bug risk",
            "file": "a.py",
            "line": 10,
            "reason": "r",
            "suggestedFixDescription": "d",
            "isResolved": "true",
            "unknownField": {"x": 1}
        }"#;
        let issue: ReviewIssue = serde_json::from_str(raw).unwrap();
        assert_eq!(issue.id.as_deref(), Some("42"));
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.category, Category::BugRisk);
        assert_eq!(issue.line, "10");
        assert!(issue.is_resolved);
    }

    #[test]
    fn invalid_enums_fall_back() {
        let raw = r#"{"severity": "CATASTROPHIC", "category": "VIBES", "file": "f", "line": "1", "reason": "r"}"#;
        let issue: ReviewIssue = serde_json::from_str(raw).unwrap();
        assert_eq!(issue.severity, Severity::Medium);
        assert_eq!(issue.category, Category::CodeQuality);
    }

    #[test]
    fn fingerprint_is_stable_within_line_band() {
        let mut a = ReviewIssue {
            file: "a.py".into(),
            line: "9".into(),
            severity: Severity::High,
            reason: "Hardcoded secret".into(),
            ..Default::default()
        };
        let fp1 = a.fingerprint();
        a.line = "10".into();
        // 9/3 == 10/3 == 3
        assert_eq!(fp1, a.fingerprint());
        a.line = "12".into();
        assert_ne!(fp1, a.fingerprint());
    }

    #[test]
    fn line_range_uses_start() {
        let issue = ReviewIssue {
            line: "42-45".into(),
            ..Default::default()
        };
        assert_eq!(issue.line_number(), Some(42));
    }
}
