//! End-to-end pipeline tests with scripted LLM/retrieval fakes.
//!
//! Covers the observable behaviors of the orchestrator: the happy path on a
//! simple added file, resolved-issue preservation in incremental mode,
//! malformed-JSON recovery, the Stage-1 tool budget, cancellation, and the
//! PR-unindex finalizer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ai_llm_service::chat::{ChatOutcome, ChatTurn, ToolCall, ToolSpec};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use pr_reviewer::errors::RetrievalFailure;
use pr_reviewer::model::request::{AnalysisMode, PreviousIssue};
use pr_reviewer::review::gateway::{ContextRetriever, GatewayError, LlmGateway, ToolBackend};
use pr_reviewer::{
    Error, Event, EventSink, NoToolBackend, Orchestrator, OrchestratorConfig, ReviewRequest,
};

/* ------------------------------ fakes ------------------------------ */

const PLAN_JSON: &str = r#"{
  "analysis_summary": "One small python file added.",
  "file_groups": [
    {
      "group_id": "g1",
      "priority": "MEDIUM",
      "rationale": "simple addition",
      "files": [{"path": "src/foo.py", "focus_areas": ["general review"], "risk_level": "MEDIUM"}]
    }
  ],
  "files_to_skip": [],
  "cross_file_concerns": ["none expected"]
}"#;

const STAGE2_JSON: &str = r#"{
  "pr_risk_level": "LOW",
  "cross_file_issues": [],
  "data_flow_concerns": [],
  "immutability_enforcement": null,
  "database_integrity": null,
  "pr_recommendation": "APPROVE",
  "confidence": "HIGH"
}"#;

/// Scripted LLM: routes by stage marker in the prompt.
struct ScriptedLlm {
    stage0: String,
    stage1: String,
    stage1_calls: Arc<AtomicUsize>,
    cancel_after_first_batch: Option<CancellationToken>,
}

impl ScriptedLlm {
    fn new(stage0: &str, stage1: &str) -> Self {
        Self {
            stage0: stage0.to_string(),
            stage1: stage1.to_string(),
            stage1_calls: Arc::new(AtomicUsize::new(0)),
            cancel_after_first_batch: None,
        }
    }
}

impl LlmGateway for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        if prompt.contains("planning stage") {
            return Ok(self.stage0.clone());
        }
        if prompt.contains("per-file review stage") {
            let n = self.stage1_calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                if let Some(token) = &self.cancel_after_first_batch {
                    token.cancel();
                }
            }
            return Ok(self.stage1.clone());
        }
        if prompt.contains("cross-file analysis stage") {
            return Ok(STAGE2_JSON.to_string());
        }
        if prompt.contains("report stage") {
            return Ok("## Review\nLooks reasonable overall.".to_string());
        }
        if prompt.contains("JSON repair expert") {
            return Ok(self.stage0.clone());
        }
        Ok("{}".to_string())
    }

    async fn chat(
        &self,
        _turns: &[ChatTurn],
        _tools: &[ToolSpec],
    ) -> Result<ChatOutcome, GatewayError> {
        Ok(ChatOutcome::Message(self.stage1.clone()))
    }
}

/// Retriever fake: optionally enabled; index/delete counters are shared so
/// tests keep a handle after the orchestrator takes ownership.
#[derive(Clone, Default)]
struct RecordingRetriever {
    enabled: bool,
    indexed: Arc<AtomicUsize>,
    deleted: Arc<AtomicUsize>,
}

impl ContextRetriever for RecordingRetriever {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn pr_context(
        &self,
        _q: &contextor::PrContextQuery,
    ) -> Result<Option<contextor::RagContext>, RetrievalFailure> {
        Ok(None)
    }

    async fn deterministic_context(
        &self,
        _q: &contextor::DeterministicQuery,
    ) -> Result<Option<contextor::DeterministicContext>, RetrievalFailure> {
        Ok(None)
    }

    async fn index_pr_files(
        &self,
        _r: &contextor::IndexPrFilesRequest,
    ) -> Result<contextor::IndexPrFilesResponse, RetrievalFailure> {
        self.indexed.fetch_add(1, Ordering::SeqCst);
        Ok(contextor::IndexPrFilesResponse {
            status: "indexed".to_string(),
            chunks_indexed: 3,
        })
    }

    async fn delete_pr_files(&self, _w: &str, _p: &str, _n: i64) -> Result<(), RetrievalFailure> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn simple_request() -> ReviewRequest {
    ReviewRequest {
        project_vcs_workspace: "acme".into(),
        project_vcs_repo_slug: "widgets".into(),
        project_workspace: "acme".into(),
        project_namespace: "widgets".into(),
        ai_provider: "OPENAI".into(),
        ai_model: "test-model".into(),
        ai_api_key: "k".into(),
        target_branch_name: Some("main".into()),
        pull_request_id: Some(17),
        commit_hash: Some("deadbeef".into()),
        pr_title: Some("Add greeting".into()),
        changed_files: vec!["src/foo.py".into()],
        raw_diff: Some(
            "diff --git a/src/foo.py b/src/foo.py\nnew file mode 100644\n--- /dev/null\n+++ b/src/foo.py\n@@ -0,0 +1,1 @@\n+def greet(): return \"hi\"".into(),
        ),
        ..Default::default()
    }
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    events
}

/* ---------------------------- scenarios ---------------------------- */

#[tokio::test]
async fn s1_simple_add_produces_report_and_ordered_events() {
    let stage1 = r#"{"reviews": [{"file": "src/foo.py", "analysis_summary": "ok", "issues": [], "confidence": "HIGH", "note": ""}]}"#;
    let llm = ScriptedLlm::new(PLAN_JSON, stage1);
    let (sink, rx) = EventSink::channel(64);

    let orch =
        Orchestrator::new(llm, RecordingRetriever::default(), NoToolBackend).with_events(sink);
    let outcome = orch.orchestrate(&simple_request()).await.unwrap();
    drop(orch);

    assert!(!outcome.comment.is_empty());
    assert!(outcome.issues.is_empty());

    let events = drain(rx).await;
    let states: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            Event::Status { state, .. } => Some(state.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec!["stage_0_started", "stage_1_started", "stage_2_started", "stage_3_started"]
    );
    assert!(events.iter().any(|e| matches!(e, Event::Progress { percent: 100, .. })));
    assert!(!events.iter().any(|e| matches!(e, Event::Error { .. })));
}

#[tokio::test]
async fn s2_resolved_issue_stays_resolved_in_incremental_mode() {
    let stage1 = r#"{"reviews": [{"file": "a.py", "analysis_summary": "", "issues": [
        {"id": "42", "severity": "HIGH", "category": "SECURITY", "file": "a.py", "line": "12",
         "reason": "LLM re-reports the old problem", "suggestedFixDescription": "",
         "isResolved": false}
    ], "confidence": "HIGH", "note": ""}]}"#;
    let plan = PLAN_JSON.replace("src/foo.py", "a.py");
    let llm = ScriptedLlm::new(&plan, stage1);

    let mut request = simple_request();
    request.changed_files = vec!["a.py".into()];
    request.analysis_mode = AnalysisMode::Incremental;
    request.delta_diff = Some(
        "diff --git a/a.py b/a.py\n--- a/a.py\n+++ b/a.py\n@@ -10,3 +10,4 @@\n context\n+new_value = compute_thing()\n context2\n context3".into(),
    );
    request.raw_diff = request.delta_diff.clone();
    request.previous_code_analysis_issues = vec![PreviousIssue {
        id: Some("42".into()),
        severity: Some("HIGH".into()),
        category: Some("SECURITY".into()),
        file: Some("a.py".into()),
        line: Some(10),
        reason: Some("Hardcoded token in config".into()),
        status: Some("resolved".into()),
        ..Default::default()
    }];

    let orch = Orchestrator::new(llm, RecordingRetriever::default(), NoToolBackend);
    let outcome = orch.orchestrate(&request).await.unwrap();

    let issue = outcome
        .issues
        .iter()
        .find(|i| i.id.as_deref() == Some("42"))
        .expect("issue 42 present");
    assert!(issue.is_resolved, "resolved issue must never reopen");
    assert_eq!(issue.reason, "Hardcoded token in config");
}

#[tokio::test]
async fn s5_malformed_stage0_json_is_repaired_locally() {
    // A literal newline inside the analysis_summary string.
    let malformed = PLAN_JSON.replace(
        "One small python file added.",
        "One small python file\nadded.",
    );
    let stage1 = r#"{"reviews": []}"#;
    let llm = ScriptedLlm::new(&malformed, stage1);

    let orch = Orchestrator::new(llm, RecordingRetriever::default(), NoToolBackend);
    let outcome = orch.orchestrate(&simple_request()).await.unwrap();
    assert!(!outcome.comment.is_empty());
}

#[tokio::test]
async fn s6_cancellation_mid_stage1_emits_error_and_unindexes() {
    let stage1 = r#"{"reviews": []}"#;
    // Three files in three directories, one file per batch.
    let plan = r#"{
      "analysis_summary": "three isolated files",
      "file_groups": [
        {"group_id": "g1", "priority": "MEDIUM", "rationale": "", "files": [
          {"path": "a/x.py", "focus_areas": [], "risk_level": "MEDIUM"},
          {"path": "b/y.py", "focus_areas": [], "risk_level": "MEDIUM"},
          {"path": "c/z.py", "focus_areas": [], "risk_level": "MEDIUM"}
        ]}
      ],
      "files_to_skip": [],
      "cross_file_concerns": []
    }"#;

    let cancel = CancellationToken::new();
    let mut llm = ScriptedLlm::new(plan, stage1);
    llm.cancel_after_first_batch = Some(cancel.clone());

    let retriever = RecordingRetriever {
        enabled: true,
        ..Default::default()
    };
    let retriever_handle = retriever.clone();

    let mut request = simple_request();
    request.changed_files = vec!["a/x.py".into(), "b/y.py".into(), "c/z.py".into()];
    request.raw_diff = Some(
        ["a/x.py", "b/y.py", "c/z.py"]
            .iter()
            .map(|p| {
                format!(
                    "diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -1,1 +1,1 @@\n-old\n+new_value = compute()\n"
                )
            })
            .collect::<String>(),
    );

    let (sink, rx) = EventSink::channel(64);
    let orch = Orchestrator::new(llm, retriever, NoToolBackend)
        .with_events(sink)
        .with_cancellation(cancel)
        .with_config(OrchestratorConfig {
            max_batch_size: 1,
            min_batch_size: 1,
            max_parallel_stage_1: 1,
            ..Default::default()
        });

    let result = orch.orchestrate(&request).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    drop(orch);

    // Finalizer ran even though the request was cancelled.
    assert_eq!(retriever_handle.indexed.load(Ordering::SeqCst), 1);
    assert_eq!(retriever_handle.deleted.load(Ordering::SeqCst), 1);

    // Stream ends with a single error and no final event.
    let events = drain(rx).await;
    let last = events.last().expect("events emitted");
    match last {
        Event::Error { message } => assert_eq!(message, "cancelled"),
        other => panic!("expected terminal error, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, Event::Final { .. })));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::Error { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn pr_index_finalizer_runs_on_success() {
    let stage1 = r#"{"reviews": []}"#;
    let llm = ScriptedLlm::new(PLAN_JSON, stage1);
    let retriever = RecordingRetriever {
        enabled: true,
        ..Default::default()
    };
    let handle = retriever.clone();

    let orch = Orchestrator::new(llm, retriever, NoToolBackend);
    orch.orchestrate(&simple_request()).await.unwrap();

    assert_eq!(handle.indexed.load(Ordering::SeqCst), 1);
    assert_eq!(handle.deleted.load(Ordering::SeqCst), 1);
}

/* --------------------- S4: tool budget scenario --------------------- */

/// LLM that tries five tool calls in one Stage-1 batch, then answers. Tool
/// results echoed back into the chat are recorded through a shared handle.
struct ToolHungryLlm {
    rounds: Arc<AtomicUsize>,
    seen_tool_results: Arc<Mutex<Vec<String>>>,
}

impl LlmGateway for ToolHungryLlm {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        if prompt.contains("planning stage") {
            return Ok(PLAN_JSON.to_string());
        }
        if prompt.contains("cross-file analysis stage") {
            return Ok(STAGE2_JSON.to_string());
        }
        Ok("## Report".to_string())
    }

    async fn chat(
        &self,
        turns: &[ChatTurn],
        _tools: &[ToolSpec],
    ) -> Result<ChatOutcome, GatewayError> {
        let tool_results: Vec<String> = turns
            .iter()
            .filter_map(|turn| match turn {
                ChatTurn::Tool { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect();
        if !tool_results.is_empty() {
            *self.seen_tool_results.lock().unwrap() = tool_results;
        }
        let round = self.rounds.fetch_add(1, Ordering::SeqCst);
        if round == 0 {
            let calls = (0..5)
                .map(|i| ToolCall {
                    id: format!("call-{i}"),
                    name: "getBranchFileContent".to_string(),
                    arguments: format!("{{\"branch\": \"main\", \"filePath\": \"file{i}.py\"}}"),
                })
                .collect();
            Ok(ChatOutcome::ToolCalls(calls))
        } else {
            Ok(ChatOutcome::Message(
                r#"{"reviews": [{"file": "src/foo.py", "analysis_summary": "done", "issues": [], "confidence": "HIGH", "note": ""}]}"#
                    .to_string(),
            ))
        }
    }
}

/// Backend with canned file content.
struct CannedToolBackend;

impl ToolBackend for CannedToolBackend {
    async fn call_tool(&self, name: &str, args: &Value) -> Result<String, String> {
        let path = args.get("filePath").and_then(Value::as_str).unwrap_or("?");
        Ok(format!("{name}({path}): canned content"))
    }
}

#[tokio::test]
async fn s4_tool_budget_is_enforced_and_batch_still_completes() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let llm = ToolHungryLlm {
        rounds: Arc::new(AtomicUsize::new(0)),
        seen_tool_results: seen.clone(),
    };

    let mut request = simple_request();
    request.use_vcs_tools = true;

    let orch = Orchestrator::new(llm, RecordingRetriever::default(), CannedToolBackend);
    let outcome = orch.orchestrate(&request).await.unwrap();
    assert!(!outcome.comment.is_empty());

    let results = seen.lock().unwrap();
    assert_eq!(results.len(), 5);
    // Calls 1-3 succeed with canned content; calls 4 and 5 hit the budget.
    assert!(results[..3].iter().all(|r| r.contains("canned content")));
    assert_eq!(results[3], "Tool budget exhausted (3 calls used in stage_1).");
    assert_eq!(results[4], "Tool budget exhausted (3 calls used in stage_1).");
}
