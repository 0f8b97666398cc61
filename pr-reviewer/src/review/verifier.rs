//! Stage 1.5: LLM-driven verification of suspect findings.
//!
//! Reviewers that only see a diff sometimes report a symbol as missing when
//! it exists elsewhere in the file. When the request carries file-content
//! enrichment, an agent with a single local tool (`searchFileContent`)
//! checks each suspect issue; issues whose symbol is found are dropped as
//! false positives. Fail-open: any failure returns the input unchanged.

use std::collections::HashMap;

use ai_llm_service::chat::{ChatOutcome, ChatTurn, ToolSpec};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::model::enrichment::PrEnrichmentData;
use crate::model::issue::{Category, ReviewIssue};
use crate::review::gateway::LlmGateway;
use crate::review::prompt;
use crate::review::structured::parse_structured;

/// Reason phrases that mark an issue as a possible diff-blindness artifact.
const SUSPECT_PHRASES: &[&str] = &[
    "undefined",
    "missing import",
    "not defined",
    "does not exist",
    "cannot find",
    "unresolved",
    "missing property",
    "missing method",
];

/// Max chat rounds for the verification agent.
const MAX_AGENT_STEPS: usize = 8;

#[derive(Debug, Deserialize)]
struct VerificationResult {
    #[serde(default)]
    issue_ids_to_drop: Vec<String>,
}

/// Verify suspect issues against the enriched file contents.
pub async fn run_verification<L: LlmGateway>(
    llm: &L,
    issues: Vec<ReviewIssue>,
    enrichment: Option<&PrEnrichmentData>,
    parse_retries: usize,
) -> Vec<ReviewIssue> {
    let Some(enrichment) = enrichment else {
        return issues;
    };
    let contents: HashMap<&str, &str> = enrichment
        .file_contents
        .iter()
        .filter_map(|f| f.content.as_deref().map(|c| (f.path.as_str(), c)))
        .collect();
    if contents.is_empty() {
        info!("stage1.5: no file contents in enrichment, skipping verification");
        return issues;
    }

    // Partition out suspect issues; everything else passes through.
    let suspect_categories = [Category::BugRisk, Category::CodeQuality, Category::Architecture];
    let mut suspects: Vec<(String, ReviewIssue)> = Vec::new();
    let mut safe: Vec<ReviewIssue> = Vec::new();

    for (idx, issue) in issues.into_iter().enumerate() {
        let reason_lower = issue.reason.to_lowercase();
        let is_suspect = suspect_categories.contains(&issue.category)
            && SUSPECT_PHRASES.iter().any(|p| reason_lower.contains(p));
        if is_suspect {
            let label = issue
                .id
                .clone()
                .unwrap_or_else(|| format!("suspect-{idx}"));
            suspects.push((label, issue));
        } else {
            safe.push(issue);
        }
    }

    if suspects.is_empty() {
        info!("stage1.5: no suspect issues, skipping verification");
        return safe;
    }

    info!(count = suspects.len(), "stage1.5: verifying suspect issues");

    let issues_block: String = suspects
        .iter()
        .map(|(label, issue)| {
            format!("ID: {label}\nFile: {}\nReason: {}\n---\n", issue.file, issue.reason)
        })
        .collect();

    match drive_agent(llm, &issues_block, &contents, parse_retries).await {
        Ok(ids_to_drop) => {
            info!(
                dropped = ids_to_drop.len(),
                "stage1.5: agent identified false positives"
            );
            let mut kept = safe;
            for (label, issue) in suspects {
                if !ids_to_drop.contains(&label) {
                    kept.push(issue);
                }
            }
            kept
        }
        Err(e) => {
            warn!(error = %e, "stage1.5: verification failed, keeping all issues");
            let mut kept = safe;
            kept.extend(suspects.into_iter().map(|(_, issue)| issue));
            kept
        }
    }
}

/// One tool spec: `searchFileContent(filePath, searchString)`.
fn search_tool_spec() -> ToolSpec {
    ToolSpec {
        name: "searchFileContent".to_string(),
        description:
            "Search for an exact string within the full content of a file. Use this to verify whether a variable, method, or import actually exists."
                .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "filePath": {"type": "string", "description": "Path of the file to search in"},
                "searchString": {"type": "string", "description": "Exact string to search for"}
            },
            "required": ["filePath", "searchString"]
        }),
    }
}

/// Answer a tool call from the in-memory contents cache.
fn search_file_content(contents: &HashMap<&str, &str>, args: &Value) -> String {
    let file_path = args.get("filePath").and_then(Value::as_str).unwrap_or("");
    let needle = args.get("searchString").and_then(Value::as_str).unwrap_or("");

    let Some(content) = contents.get(file_path) else {
        return format!("Error: File content for '{file_path}' not available in memory.");
    };
    if content.contains(needle) {
        format!("Found: The string '{needle}' exists in '{file_path}'.")
    } else {
        format!("Not Found: The string '{needle}' does NOT exist in '{file_path}'.")
    }
}

async fn drive_agent<L: LlmGateway>(
    llm: &L,
    issues_block: &str,
    contents: &HashMap<&str, &str>,
    parse_retries: usize,
) -> Result<Vec<String>, String> {
    let tools = vec![search_tool_spec()];
    let mut turns = vec![
        ChatTurn::System("You are a helpful verification assistant.".to_string()),
        ChatTurn::User(prompt::build_verification_prompt(issues_block)),
    ];

    for _ in 0..MAX_AGENT_STEPS {
        match llm.chat(&turns, &tools).await.map_err(|e| e.to_string())? {
            ChatOutcome::Message(text) => {
                let result: VerificationResult = parse_structured(
                    llm,
                    &text,
                    "VerificationResult",
                    prompt::VERIFICATION_SCHEMA,
                    parse_retries,
                )
                .await
                .map_err(|e| e.to_string())?;
                return Ok(result.issue_ids_to_drop);
            }
            ChatOutcome::ToolCalls(calls) => {
                turns.push(ChatTurn::Assistant {
                    content: None,
                    tool_calls: calls.clone(),
                });
                for call in calls {
                    let answer = if call.name == "searchFileContent" {
                        search_file_content(contents, &call.arguments_json())
                    } else {
                        format!("Error: unknown tool '{}'.", call.name)
                    };
                    turns.push(ChatTurn::Tool {
                        call_id: call.id,
                        content: answer,
                    });
                }
            }
        }
    }

    Err("verification agent exceeded its step limit".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::enrichment::FileContent;

    #[test]
    fn search_answers_from_cache() {
        let mut contents = HashMap::new();
        contents.insert("a.py", "def helper():\n    return 1\n");

        let found = search_file_content(
            &contents,
            &serde_json::json!({"filePath": "a.py", "searchString": "helper"}),
        );
        assert!(found.starts_with("Found:"));

        let missing = search_file_content(
            &contents,
            &serde_json::json!({"filePath": "a.py", "searchString": "absent_symbol"}),
        );
        assert!(missing.starts_with("Not Found:"));

        let unavailable = search_file_content(
            &contents,
            &serde_json::json!({"filePath": "b.py", "searchString": "x"}),
        );
        assert!(unavailable.starts_with("Error:"));
    }

    #[tokio::test]
    async fn no_enrichment_is_a_passthrough() {
        struct PanicLlm;
        impl LlmGateway for PanicLlm {
            async fn complete(
                &self,
                _p: &str,
            ) -> Result<String, crate::review::gateway::GatewayError> {
                panic!("must not be called");
            }
            async fn chat(
                &self,
                _t: &[ChatTurn],
                _s: &[ToolSpec],
            ) -> Result<ChatOutcome, crate::review::gateway::GatewayError> {
                panic!("must not be called");
            }
        }

        let issues = vec![ReviewIssue {
            category: Category::BugRisk,
            reason: "symbol is undefined".to_string(),
            ..Default::default()
        }];
        let out = run_verification(&PanicLlm, issues.clone(), None, 2).await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn found_symbols_are_dropped() {
        struct AgentLlm;
        impl LlmGateway for AgentLlm {
            async fn complete(
                &self,
                _p: &str,
            ) -> Result<String, crate::review::gateway::GatewayError> {
                Ok("{\"issue_ids_to_drop\": []}".to_string())
            }
            async fn chat(
                &self,
                turns: &[ChatTurn],
                _s: &[ToolSpec],
            ) -> Result<ChatOutcome, crate::review::gateway::GatewayError> {
                // First round: call the tool; second round: drop the issue.
                let has_tool_result = turns
                    .iter()
                    .any(|t| matches!(t, ChatTurn::Tool { content, .. } if content.starts_with("Found:")));
                if has_tool_result {
                    Ok(ChatOutcome::Message(
                        "{\"issue_ids_to_drop\": [\"42\"]}".to_string(),
                    ))
                } else {
                    Ok(ChatOutcome::ToolCalls(vec![ai_llm_service::chat::ToolCall {
                        id: "c1".to_string(),
                        name: "searchFileContent".to_string(),
                        arguments: "{\"filePath\": \"a.py\", \"searchString\": \"helper\"}"
                            .to_string(),
                    }]))
                }
            }
        }

        let enrichment = PrEnrichmentData {
            file_contents: vec![FileContent {
                path: "a.py".to_string(),
                content: Some("def helper(): pass".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let issues = vec![
            ReviewIssue {
                id: Some("42".to_string()),
                category: Category::BugRisk,
                file: "a.py".to_string(),
                reason: "helper is undefined in this module".to_string(),
                ..Default::default()
            },
            ReviewIssue {
                category: Category::Security,
                reason: "Hardcoded secret".to_string(),
                ..Default::default()
            },
        ];

        let out = run_verification(&AgentLlm, issues, Some(&enrichment), 2).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].category, Category::Security);
    }
}
