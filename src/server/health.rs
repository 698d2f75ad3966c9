//! Health and readiness endpoints.

use axum::Json;
use serde_json::{json, Value};

/// Liveness: the process is up.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness: dependencies are wired. The store connection is validated at
/// startup; once serving, we are ready.
pub async fn readiness_check() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}
