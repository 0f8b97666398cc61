//! HTTP endpoint for triggering a PR review.
//!
//! Content negotiation: when the `Accept` header contains
//! `application/x-ndjson`, the response is a stream of NDJSON events (one
//! JSON object per line), terminated by a single `final` or `error` event;
//! otherwise the response is a single JSON body `{result, error?}`.
//!
//! Client disconnect on a streaming response cancels the in-flight review;
//! the orchestrator's unindex finalizer still runs.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Json, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use ai_llm_service::{
    LlmClient,
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    sanitizer::sanitize_error_for_display,
};
use pr_reviewer::{
    Event, EventSink, NoToolBackend, Orchestrator, ReviewRequest,
};

use crate::core::app_state::AppState;
use crate::routes::review::review_response::ReviewResponse;

/// Bound of the per-request event queue; status/progress beyond it drop.
const EVENT_QUEUE_CAPACITY: usize = 256;

#[instrument(name = "review_route", skip(state, headers, body))]
pub async fn review_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ReviewRequest>,
) -> Response {
    if let Some(id) = headers.get("X-Request-Id").and_then(|h| h.to_str().ok()) {
        debug!(%id, "request id attached");
    }

    let llm = match build_llm(&state, &body) {
        Ok(llm) => llm,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ReviewResponse::error(message)),
            )
                .into_response();
        }
    };

    info!(
        pr = body.pull_request_id.unwrap_or_default(),
        files = body.changed_files.len(),
        mode = ?body.analysis_mode,
        "starting PR review"
    );

    if wants_streaming(&headers) {
        stream_review(state, llm, body)
    } else {
        let orchestrator = Orchestrator::new(llm, state.rag.clone(), NoToolBackend);
        match orchestrator.orchestrate(&body).await {
            Ok(result) => Json(ReviewResponse::success(result)).into_response(),
            Err(e) => {
                error!(error = %e, "review failed");
                let message = sanitize_error_for_display(&e.to_string());
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ReviewResponse::error(message)),
                )
                    .into_response()
            }
        }
    }
}

/// Run the review in a background task and stream its events as NDJSON.
fn stream_review(state: Arc<AppState>, llm: LlmClient, request: ReviewRequest) -> Response {
    let (sink, rx) = EventSink::channel(EVENT_QUEUE_CAPACITY);
    let cancel = CancellationToken::new();
    let child_cancel = cancel.clone();

    tokio::spawn(async move {
        let orchestrator = Orchestrator::new(llm, state.rag.clone(), NoToolBackend)
            .with_events(sink.clone())
            .with_cancellation(child_cancel);
        // The orchestrator emits the terminal `error` itself; success gets
        // its `final` here so the result always closes the stream.
        if let Ok(result) = orchestrator.orchestrate(&request).await {
            sink.finished(result).await;
        }
    });

    let body = event_stream_body(rx, cancel);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// NDJSON line stream over the event receiver.
///
/// Opens with a `queued` status, stops after the terminal event, and
/// cancels the pipeline when the stream is dropped (client disconnect).
fn event_stream_body(rx: tokio::sync::mpsc::Receiver<Event>, cancel: CancellationToken) -> Body {
    struct CancelOnDrop(CancellationToken);
    impl Drop for CancelOnDrop {
        fn drop(&mut self) {
            self.0.cancel();
        }
    }

    let opening = to_ndjson_line(&Event::Status {
        state: "queued".to_string(),
        message: "request received".to_string(),
    });

    let stream = futures::stream::unfold(
        (rx, CancelOnDrop(cancel), Some(opening), false),
        |(mut rx, guard, mut opening, done)| async move {
            if let Some(line) = opening.take() {
                return Some((Ok::<_, std::convert::Infallible>(line), (rx, guard, None, false)));
            }
            if done {
                return None;
            }
            match rx.recv().await {
                Some(event) => {
                    let line = to_ndjson_line(&event);
                    let terminal = event.is_terminal();
                    Some((Ok(line), (rx, guard, None, terminal)))
                }
                None => None,
            }
        },
    );
    Body::from_stream(stream)
}

fn to_ndjson_line(event: &Event) -> String {
    let mut line = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    line
}

fn wants_streaming(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .map(|accept| accept.to_lowercase().contains("application/x-ndjson"))
        .unwrap_or(false)
}

/// Build the per-request LLM client from the request's AI binding.
fn build_llm(state: &AppState, request: &ReviewRequest) -> Result<LlmClient, String> {
    let provider = LlmProvider::from_str(&request.ai_provider)
        .map_err(|e| sanitize_error_for_display(&e.to_string()))?;

    let endpoint = match provider {
        LlmProvider::OpenAi => state.openai_base_url.clone(),
        LlmProvider::Ollama => state.ollama_url.clone(),
    };

    let mut cfg = LlmModelConfig::new(provider, request.ai_model.clone(), endpoint);
    cfg.timeout_secs = Some(state.llm_timeout_secs);
    if !request.ai_api_key.is_empty() {
        cfg = cfg.with_api_key(request.ai_api_key.clone());
    }
    if let Some(max) = request.max_allowed_tokens {
        cfg = cfg.with_max_tokens(max);
    }

    LlmClient::from_config(cfg).map_err(|e| sanitize_error_for_display(&e.to_string()))
}
