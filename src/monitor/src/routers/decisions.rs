//! # Decisions
//!
//! Listing and detail for L2 verdicts, the child-facing request endpoint
//! (shared secret), and the agent feedback path.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use cortex_common::models::{
    ApiResponse, DecisionRequest, IssueLevel, IssueReport, UpstreamDecision,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::auth::{AgentAuth, AuthUser};
use crate::error::MonitorError;
use crate::store::{DecisionFilter, DecisionRecord};
use crate::ws::MonitorEvent;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/decisions", get(list_decisions))
        .route("/decisions/request", post(decision_request))
        .route("/decisions/:decision_id", get(get_decision))
        .route("/decisions/:decision_id/feedback", post(decision_feedback))
}

/// Accept an L2 request from a child Monitor, decide it locally, and return
/// the verdict payload.
async fn decision_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<UpstreamDecision>>, MonitorError> {
    let expected = &state.settings.monitor.registration_token;
    if !expected.is_empty() {
        let provided = headers
            .get("x-registration-token")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            return Err(MonitorError::Unauthorized(
                "invalid registration token".to_string(),
            ));
        }
    }

    info!(
        "L2 decision request from child for agent {}: {}",
        request.agent_id, request.issue_type
    );

    let issue = IssueReport {
        level: IssueLevel::L2,
        kind: request.issue_type,
        description: request.issue_description,
        severity: request.severity,
        proposed_fix: request.proposed_action,
        risk_assessment: request.risk_assessment,
        details: request.details,
        timestamp: Utc::now(),
    };

    let decision = state
        .engine
        .analyze_and_decide(&issue, &request.agent_id)
        .await?;

    state.broadcaster.publish(&MonitorEvent::DecisionMade {
        decision_id: decision.id,
        agent_id: decision.agent_id.clone(),
        status: decision.status,
        reason: decision.reason.clone().unwrap_or_default(),
    });

    Ok(Json(ApiResponse::ok(
        UpstreamDecision {
            decision_id: decision.id,
            status: decision.status,
            reason: decision.reason.unwrap_or_default(),
            llm_analysis: decision.llm_analysis,
            created_at: decision.created_at,
        },
        "Decision made",
    )))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    agent_id: Option<String>,
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

fn decision_view(decision: &DecisionRecord) -> serde_json::Value {
    json!({
        "id": decision.id,
        "agent_id": decision.agent_id,
        "issue_type": decision.issue_type,
        "issue_description": decision.issue_description,
        "proposed_action": decision.proposed_action,
        "status": decision.status,
        "reason": decision.reason,
        "created_at": decision.created_at,
        "executed_at": decision.executed_at,
    })
}

async fn list_decisions(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let decisions = state
        .store
        .list_decisions(&DecisionFilter {
            agent_id: params.agent_id,
            status: params.status,
            limit: params.limit.clamp(1, 1000),
            offset: params.offset,
        })
        .await?;

    Ok(Json(ApiResponse::ok(
        json!({
            "decisions": decisions.iter().map(decision_view).collect::<Vec<_>>(),
            "count": decisions.len(),
            "limit": params.limit,
            "offset": params.offset,
        }),
        "Decisions retrieved successfully",
    )))
}

async fn get_decision(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(decision_id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let decision = state
        .store
        .get_decision(decision_id)
        .await?
        .ok_or(MonitorError::NotFound("decision"))?;

    Ok(Json(ApiResponse::ok(
        json!({
            "id": decision.id,
            "agent_id": decision.agent_id,
            "issue_type": decision.issue_type,
            "issue_description": decision.issue_description,
            "proposed_action": decision.proposed_action,
            "llm_analysis": decision.llm_analysis,
            "status": decision.status,
            "reason": decision.reason,
            "created_at": decision.created_at,
            "executed_at": decision.executed_at,
            "execution_result": decision.execution_result,
        }),
        "Decision retrieved successfully",
    )))
}

#[derive(Debug, Deserialize)]
struct FeedbackBody {
    execution_result: String,
}

async fn decision_feedback(
    State(state): State<Arc<AppState>>,
    _auth: AgentAuth,
    Path(decision_id): Path<i64>,
    Json(body): Json<FeedbackBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    if body.execution_result.trim().is_empty() {
        return Err(MonitorError::Validation(
            "execution_result must not be empty".to_string(),
        ));
    }

    let decision = state
        .store
        .record_decision_feedback(decision_id, &body.execution_result)
        .await?;

    Ok(Json(ApiResponse::ok(
        json!({
            "decision_id": decision.id,
            "executed_at": decision.executed_at,
        }),
        "Feedback received successfully",
    )))
}
