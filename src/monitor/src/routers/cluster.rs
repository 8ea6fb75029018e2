//! # Cluster Management
//!
//! Agent registration (shared-secret guarded), listing and detail, the
//! structured heartbeat, and the cluster-wide overview and topology views.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use cortex_common::cache::cache_key;
use cortex_common::models::{AgentHealth, ApiResponse};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::{AgentAuth, AuthUser};
use crate::error::MonitorError;
use crate::store::{AgentRecord, AgentRegistration};
use crate::ws::MonitorEvent;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", post(register_agent).get(list_agents))
        .route("/agents/:agent_id", get(get_agent).delete(delete_agent))
        .route("/agents/:agent_id/heartbeat", post(structured_heartbeat))
        .route("/cluster/overview", get(cluster_overview))
        .route("/cluster/topology", get(cluster_topology))
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    agent_id: String,
    name: String,
    registration_token: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    upstream_monitor_url: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let expected = &state.settings.monitor.registration_token;
    if expected.is_empty() || body.registration_token != *expected {
        return Err(MonitorError::Unauthorized(
            "invalid registration token".to_string(),
        ));
    }
    if body.agent_id.trim().is_empty() {
        return Err(MonitorError::Validation("agent_id must not be empty".to_string()));
    }

    let api_key = body
        .api_key
        .unwrap_or_else(|| format!("ak_{}", uuid::Uuid::new_v4().simple()));

    let (agent, created) = state
        .store
        .register_agent(AgentRegistration {
            agent_id: body.agent_id,
            name: body.name,
            api_key,
            parent_id: body.parent_id,
            upstream_monitor_url: body.upstream_monitor_url,
            metadata: body.metadata,
        })
        .await?;

    state.invalidate_cluster_views().await;
    state.topology.invalidate().await;

    Ok(Json(ApiResponse::ok(
        json!({
            "agent_id": agent.id,
            "name": agent.name,
            "parent_id": agent.parent_id,
            "created": created,
            "created_at": agent.created_at,
        }),
        if created {
            "Agent registered successfully"
        } else {
            "Agent updated successfully"
        },
    )))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    status: Option<String>,
    health_status: Option<String>,
}

fn agent_view(agent: &AgentRecord) -> serde_json::Value {
    json!({
        "id": agent.id,
        "name": agent.name,
        "parent_id": agent.parent_id,
        "status": agent.status,
        "health_status": agent.health_status,
        "last_heartbeat": agent.last_heartbeat,
        "created_at": agent.created_at,
    })
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    _auth: AgentAuth,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let key = cache_key(
        "agents:list",
        &json!({"status": params.status, "health_status": params.health_status}),
    );
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(ApiResponse::ok(cached, "Agents retrieved (cached)")));
    }

    let agents = state
        .store
        .list_agents(params.status.as_deref(), params.health_status.as_deref())
        .await?;

    let payload = json!({
        "agents": agents.iter().map(agent_view).collect::<Vec<_>>(),
        "count": agents.len(),
    });

    state.cache.set(key, payload.clone(), None).await;
    Ok(Json(ApiResponse::ok(payload, "Agents retrieved successfully")))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    _auth: AgentAuth,
    Path(agent_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let key = cache_key("agents:detail", &json!({"agent_id": agent_id}));
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(ApiResponse::ok(cached, "Agent retrieved (cached)")));
    }

    let agent = state
        .store
        .get_agent(&agent_id)
        .await?
        .ok_or(MonitorError::NotFound("agent"))?;
    let (total_reports, reports_last_24h) = state.store.report_stats(&agent_id).await?;

    let payload = json!({
        "id": agent.id,
        "name": agent.name,
        "parent_id": agent.parent_id,
        "upstream_monitor_url": agent.upstream_monitor_url,
        "status": agent.status,
        "health_status": agent.health_status,
        "last_heartbeat": agent.last_heartbeat,
        "created_at": agent.created_at,
        "updated_at": agent.updated_at,
        "metadata": agent.metadata,
        "statistics": {
            "total_reports": total_reports,
            "reports_last_24h": reports_last_24h,
        },
    });

    state.cache.set(key, payload.clone(), None).await;
    Ok(Json(ApiResponse::ok(payload, "Agent retrieved successfully")))
}

async fn delete_agent(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(agent_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    auth.require_admin()?;

    state.store.delete_agent(&agent_id).await?;
    state.invalidate_cluster_views().await;
    state.topology.invalidate().await;

    Ok(Json(ApiResponse::ok(
        json!({"agent_id": agent_id}),
        "Agent deleted successfully",
    )))
}

#[derive(Debug, Deserialize)]
struct StructuredHeartbeat {
    #[serde(default)]
    health_status: Option<String>,
}

async fn structured_heartbeat(
    State(state): State<Arc<AppState>>,
    _auth: AgentAuth,
    Path(agent_id): Path<String>,
    Json(body): Json<StructuredHeartbeat>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let health = match body.health_status.as_deref() {
        None => None,
        Some(raw) => match raw {
            "healthy" | "warning" | "critical" | "unknown" => Some(AgentHealth::parse(raw)),
            other => {
                return Err(MonitorError::Validation(format!(
                    "invalid health_status: {other}"
                )))
            }
        },
    };

    let received_at = state.store.record_heartbeat(&agent_id, health).await?;
    state.invalidate_cluster_views().await;

    Ok(Json(ApiResponse::ok(
        json!({"agent_id": agent_id, "received_at": received_at}),
        "Heartbeat received",
    )))
}

async fn cluster_overview(
    State(state): State<Arc<AppState>>,
    _auth: AgentAuth,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let key = cache_key("cluster:overview", &json!({}));
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(ApiResponse::ok(cached, "Cluster overview (cached)")));
    }

    let counts = state.store.agent_counts().await?;
    let reports_last_hour = state.store.reports_in_last_hour().await?;

    let payload = json!({
        "agents": {
            "total": counts.total,
            "online": counts.online,
            "offline": counts.offline,
        },
        "health": {
            "healthy": counts.healthy,
            "warning": counts.warning,
            "critical": counts.critical,
            "unknown": counts.unknown,
        },
        "activity": {
            "reports_last_hour": reports_last_hour,
        },
    });

    state.cache.set(key, payload.clone(), None).await;
    Ok(Json(ApiResponse::ok(
        payload,
        "Cluster overview retrieved successfully",
    )))
}

async fn cluster_topology(
    State(state): State<Arc<AppState>>,
    _auth: AgentAuth,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let view = state.topology.snapshot().await?;
    Ok(Json(ApiResponse::ok(
        serde_json::to_value(&view)?,
        "Cluster topology retrieved successfully",
    )))
}
