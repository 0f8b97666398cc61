//! Budgeted, whitelisted facade over the VCS tool capability.
//!
//! One executor exists per stage per request. Out-of-whitelist, out-of-
//! budget, and failing calls return a descriptive textual message instead
//! of raising, so the LLM can keep reasoning. The call counter is the only
//! shared mutable state inside a request and is mutex-guarded with
//! increment-before-dispatch semantics (at most one concurrent call).

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ai_llm_service::chat::ToolSpec;

use crate::review::gateway::ToolBackend;

/// Stage a tool executor is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStage {
    Stage1,
    Stage3,
}

impl ToolStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stage1 => "stage_1",
            Self::Stage3 => "stage_3",
        }
    }

    /// Per-stage whitelist.
    pub fn allowed_tools(&self) -> &'static [&'static str] {
        match self {
            Self::Stage1 => &["getBranchFileContent"],
            Self::Stage3 => &["getBranchFileContent", "getPullRequestComments"],
        }
    }

    /// Per-stage call budget.
    pub fn max_calls(&self) -> usize {
        match self {
            Self::Stage1 => 3,
            Self::Stage3 => 5,
        }
    }
}

/// Per-stage, per-request tool executor.
pub struct ToolExecutor<'a, T: ToolBackend> {
    backend: &'a T,
    stage: ToolStage,
    workspace: String,
    repo_slug: String,
    calls_used: Mutex<usize>,
}

impl<'a, T: ToolBackend> ToolExecutor<'a, T> {
    pub fn new(backend: &'a T, stage: ToolStage, workspace: &str, repo_slug: &str) -> Self {
        Self {
            backend,
            stage,
            workspace: workspace.to_string(),
            repo_slug: repo_slug.to_string(),
            calls_used: Mutex::new(0),
        }
    }

    /// Execute a single tool call with whitelist and budget checks.
    ///
    /// Never errors: every failure mode is encoded as the returned text.
    pub async fn execute(&self, tool_name: &str, arguments: &Value) -> String {
        {
            let mut used = self.calls_used.lock().await;

            if !self.stage.allowed_tools().contains(&tool_name) {
                let msg = format!(
                    "Tool '{}' not allowed in {}. Allowed: {:?}",
                    tool_name,
                    self.stage.name(),
                    self.stage.allowed_tools()
                );
                warn!("{msg}");
                return msg;
            }

            if *used >= self.stage.max_calls() {
                let msg = format!(
                    "Tool budget exhausted ({} calls used in {}).",
                    self.stage.max_calls(),
                    self.stage.name()
                );
                warn!("{msg}");
                return msg;
            }

            *used += 1;
        }

        // Pre-fill workspace/repo from request context so the LLM never has
        // to guess them.
        let mut args = arguments.clone();
        if let Value::Object(map) = &mut args {
            map.entry("workspace")
                .or_insert_with(|| Value::String(self.workspace.clone()));
            map.entry("repoSlug")
                .or_insert_with(|| Value::String(self.repo_slug.clone()));
        }

        info!(
            stage = self.stage.name(),
            tool = tool_name,
            "dispatching tool call"
        );

        match self.backend.call_tool(tool_name, &args).await {
            Ok(text) => text,
            Err(e) => {
                warn!(stage = self.stage.name(), tool = tool_name, error = %e, "tool call failed");
                format!("Tool call failed: {e}")
            }
        }
    }

    /// Remaining budget.
    pub async fn budget_remaining(&self) -> usize {
        let used = *self.calls_used.lock().await;
        self.stage.max_calls().saturating_sub(used)
    }

    /// Tool definitions for the stage's whitelist, in function-call form.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.stage
            .allowed_tools()
            .iter()
            .map(|name| match *name {
                "getBranchFileContent" => ToolSpec {
                    name: "getBranchFileContent".to_string(),
                    description: "Read a file's content from the target branch.".to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "branch": {"type": "string", "description": "Branch name (e.g. 'main')"},
                            "filePath": {"type": "string", "description": "Path to the file in the repository"}
                        },
                        "required": ["branch", "filePath"]
                    }),
                },
                "getPullRequestComments" => ToolSpec {
                    name: "getPullRequestComments".to_string(),
                    description: "Get comments from the pull request.".to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "pullRequestId": {"type": "string", "description": "Pull request ID"}
                        },
                        "required": ["pullRequestId"]
                    }),
                },
                other => ToolSpec {
                    name: other.to_string(),
                    description: String::new(),
                    parameters: serde_json::json!({"type": "object"}),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedBackend;
    impl ToolBackend for CannedBackend {
        async fn call_tool(&self, name: &str, args: &Value) -> Result<String, String> {
            Ok(format!(
                "{name} -> workspace={}",
                args.get("workspace").and_then(Value::as_str).unwrap_or("")
            ))
        }
    }

    #[tokio::test]
    async fn budget_is_enforced_after_three_calls() {
        let backend = CannedBackend;
        let exec = ToolExecutor::new(&backend, ToolStage::Stage1, "ws", "repo");
        let args = serde_json::json!({"branch": "main", "filePath": "a.py"});

        for _ in 0..3 {
            let out = exec.execute("getBranchFileContent", &args).await;
            assert!(out.starts_with("getBranchFileContent"));
        }
        let out = exec.execute("getBranchFileContent", &args).await;
        assert_eq!(out, "Tool budget exhausted (3 calls used in stage_1).");
        assert_eq!(exec.budget_remaining().await, 0);
    }

    #[tokio::test]
    async fn whitelist_is_per_stage() {
        let backend = CannedBackend;
        let exec = ToolExecutor::new(&backend, ToolStage::Stage1, "ws", "repo");
        let out = exec
            .execute("getPullRequestComments", &serde_json::json!({}))
            .await;
        assert!(out.contains("not allowed in stage_1"));

        let exec3 = ToolExecutor::new(&backend, ToolStage::Stage3, "ws", "repo");
        let out = exec3
            .execute("getPullRequestComments", &serde_json::json!({}))
            .await;
        assert!(out.starts_with("getPullRequestComments"));
    }

    #[tokio::test]
    async fn workspace_and_repo_are_prefilled() {
        let backend = CannedBackend;
        let exec = ToolExecutor::new(&backend, ToolStage::Stage1, "acme", "widgets");
        let out = exec
            .execute(
                "getBranchFileContent",
                &serde_json::json!({"branch": "main", "filePath": "a.py"}),
            )
            .await;
        assert!(out.contains("workspace=acme"));
    }

    #[tokio::test]
    async fn rejected_calls_do_not_consume_budget() {
        let backend = CannedBackend;
        let exec = ToolExecutor::new(&backend, ToolStage::Stage1, "ws", "repo");
        for _ in 0..5 {
            exec.execute("getPullRequestComments", &serde_json::json!({}))
                .await;
        }
        assert_eq!(exec.budget_remaining().await, 3);
    }
}
