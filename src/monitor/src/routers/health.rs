//! Liveness endpoint.

use axum::Json;
use cortex_common::models::ApiResponse;

pub async fn health() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::ok(
        serde_json::json!({"status": "healthy", "service": "cortex-monitor"}),
        "Monitor is alive",
    ))
}
