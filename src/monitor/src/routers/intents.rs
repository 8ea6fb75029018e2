//! # Intent Audit Queries
//!
//! Read-only surface over the append-only audit log.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use cortex_common::models::ApiResponse;
use cortex_common::{IntentFilter, IntentKind};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::MonitorError;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/intents", get(list_intents))
        .route("/intents/stats/summary", get(intents_summary))
        .route("/intents/:intent_id", get(get_intent))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    agent_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    level: Option<String>,
    category: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_intents(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let kind = match params.kind.as_deref() {
        None => None,
        Some(raw) => Some(IntentKind::parse(raw).ok_or_else(|| {
            MonitorError::Validation(format!("invalid intent type: {raw}"))
        })?),
    };

    let records = state
        .intents
        .query(&IntentFilter {
            agent_id: params.agent_id,
            kind,
            level: params.level,
            category: params.category,
            limit: params.limit.clamp(1, 1000),
            offset: params.offset,
        })
        .await;

    let count = records.len();
    Ok(Json(ApiResponse::ok(
        json!({
            "intents": records,
            "count": count,
            "limit": params.limit,
            "offset": params.offset,
        }),
        "Intents retrieved successfully",
    )))
}

async fn get_intent(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(intent_id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let record = state
        .intents
        .get(intent_id)
        .await
        .ok_or(MonitorError::NotFound("intent"))?;

    Ok(Json(ApiResponse::ok(
        serde_json::to_value(&record)?,
        "Intent retrieved successfully",
    )))
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    #[serde(default = "default_hours")]
    hours: i64,
}

fn default_hours() -> i64 {
    24
}

async fn intents_summary(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<SummaryParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let summary = state.intents.summary(params.hours.clamp(1, 24 * 30)).await;
    Ok(Json(ApiResponse::ok(
        serde_json::to_value(&summary)?,
        "Intent summary retrieved successfully",
    )))
}
