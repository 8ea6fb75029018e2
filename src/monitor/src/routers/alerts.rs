//! # Alerts
//!
//! Listing, detail, the one-way lifecycle transitions, and the summary
//! aggregation.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use cortex_common::models::ApiResponse;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::MonitorError;
use crate::store::{AlertFilter, AlertRecord};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/alerts", get(list_alerts))
        .route("/alerts/stats/summary", get(alerts_summary))
        .route("/alerts/:alert_id", get(get_alert))
        .route("/alerts/:alert_id/acknowledge", post(acknowledge_alert))
        .route("/alerts/:alert_id/resolve", post(resolve_alert))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    agent_id: Option<String>,
    level: Option<String>,
    status: Option<String>,
    severity: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

fn alert_view(alert: &AlertRecord) -> serde_json::Value {
    json!({
        "id": alert.id,
        "agent_id": alert.agent_id,
        "level": alert.level,
        "type": alert.kind,
        "description": alert.description,
        "severity": alert.severity,
        "status": alert.status,
        "created_at": alert.created_at,
        "acknowledged_at": alert.acknowledged_at,
        "resolved_at": alert.resolved_at,
    })
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    if let Some(status) = params.status.as_deref() {
        if !matches!(status, "new" | "acknowledged" | "resolved") {
            return Err(MonitorError::Validation(format!(
                "invalid status filter: {status}"
            )));
        }
    }

    let alerts = state
        .store
        .list_alerts(&AlertFilter {
            agent_id: params.agent_id,
            level: params.level,
            status: params.status,
            severity: params.severity,
            limit: params.limit.clamp(1, 1000),
            offset: params.offset,
        })
        .await?;

    Ok(Json(ApiResponse::ok(
        json!({
            "alerts": alerts.iter().map(alert_view).collect::<Vec<_>>(),
            "count": alerts.len(),
            "limit": params.limit,
            "offset": params.offset,
        }),
        "Alerts retrieved successfully",
    )))
}

async fn get_alert(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(alert_id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let alert = state
        .store
        .get_alert(alert_id)
        .await?
        .ok_or(MonitorError::NotFound("alert"))?;

    Ok(Json(ApiResponse::ok(
        json!({
            "id": alert.id,
            "agent_id": alert.agent_id,
            "level": alert.level,
            "type": alert.kind,
            "description": alert.description,
            "severity": alert.severity,
            "status": alert.status,
            "details": alert.details,
            "created_at": alert.created_at,
            "acknowledged_at": alert.acknowledged_at,
            "acknowledged_by": alert.acknowledged_by,
            "resolved_at": alert.resolved_at,
            "notes": alert.notes,
        }),
        "Alert retrieved successfully",
    )))
}

#[derive(Debug, Deserialize)]
struct AcknowledgeBody {
    acknowledged_by: String,
    #[serde(default)]
    notes: Option<String>,
}

async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(alert_id): Path<i64>,
    Json(body): Json<AcknowledgeBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let alert = state
        .store
        .acknowledge_alert(alert_id, &body.acknowledged_by, body.notes.as_deref())
        .await?;

    Ok(Json(ApiResponse::ok(
        json!({
            "alert_id": alert.id,
            "status": alert.status,
            "acknowledged_at": alert.acknowledged_at,
        }),
        "Alert acknowledged successfully",
    )))
}

#[derive(Debug, Deserialize, Default)]
struct ResolveBody {
    #[serde(default)]
    notes: Option<String>,
}

async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(alert_id): Path<i64>,
    body: Option<Json<ResolveBody>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let notes = body.and_then(|Json(body)| body.notes);
    let alert = state
        .store
        .resolve_alert(alert_id, notes.as_deref())
        .await?;

    Ok(Json(ApiResponse::ok(
        json!({
            "alert_id": alert.id,
            "status": alert.status,
            "resolved_at": alert.resolved_at,
        }),
        "Alert resolved successfully",
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

async fn alerts_summary(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<SummaryParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let summary = state.store.alert_summary(params.hours.clamp(1, 24 * 30)).await?;
    Ok(Json(ApiResponse::ok(
        serde_json::to_value(&summary)?,
        "Alert summary retrieved successfully",
    )))
}
