use axum::response::Json;
use serde_json::{json, Value};

/// GET /health - liveness probe, no auth.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
