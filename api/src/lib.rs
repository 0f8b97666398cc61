//! HTTP surface for the review pipeline.
//!
//! Routes:
//! - `POST /review` — run a multi-stage PR review; streams NDJSON events
//!   when the client sends `Accept: application/x-ndjson`.
//! - `GET /health` — liveness probe.

pub mod core;
pub mod routes;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tracing::info;

use crate::core::app_state::AppState;
use crate::routes::{health_route::health_route, review::review_route::review_route};

/// Build the router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_route))
        .route("/review", post(review_route))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn start() -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_env());
    let app = router(state);

    let bind_addr =
        std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "review API listening");

    axum::serve(listener, app).await?;
    Ok(())
}
