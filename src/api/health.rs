//! Liveness probe.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /api/health` — always 200, never touches the upstream.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "message": "relay is running" })),
    )
}
