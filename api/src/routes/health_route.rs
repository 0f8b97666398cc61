use axum::Json;
use serde_json::json;

/// Liveness probe.
pub async fn health_route() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
