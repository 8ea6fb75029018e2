//! # Probe HTTP API
//!
//! Small local surface: liveness, scheduler status and control, redacted
//! configuration, the inspection history ring, and a WebSocket feed of
//! inspection lifecycle events.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use cortex_common::models::ApiResponse;
use cortex_common::queue::LocalQueue;
use cortex_common::settings::Settings;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::events::ProbeBroadcaster;
use crate::scheduler::ProbeScheduler;
use crate::types::ProbeError;

pub struct ProbeState {
    pub settings: Settings,
    pub scheduler: Arc<ProbeScheduler>,
    pub events: Arc<ProbeBroadcaster>,
    pub queue: Arc<LocalQueue>,
}

pub fn build_router(state: Arc<ProbeState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/config", get(config))
        .route("/execute", post(execute))
        .route("/schedule", get(schedule))
        .route("/schedule/pause", post(pause))
        .route("/schedule/resume", post(resume))
        .route("/reports", get(recent_reports))
        .route("/reports/:execution_id", get(get_report))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(ApiResponse::ok(
        serde_json::json!({"status": "healthy"}),
        "Probe is alive",
    ))
}

async fn status(State(state): State<Arc<ProbeState>>) -> impl IntoResponse {
    let mut status = state.scheduler.status().await;

    // Queue stats ride along so a permanently failed delivery is visible here
    if let Ok(stats) = state.queue.stats().await {
        if let Some(map) = status.as_object_mut() {
            map.insert("queue".to_string(), serde_json::to_value(stats).unwrap_or_default());
        }
    }

    Json(ApiResponse::ok(status, "Status retrieved"))
}

async fn config(State(state): State<Arc<ProbeState>>) -> impl IntoResponse {
    Json(ApiResponse::ok(
        state.settings.redacted(),
        "Configuration retrieved (secrets redacted)",
    ))
}

#[derive(Debug, Deserialize)]
struct ExecuteParams {
    #[serde(default)]
    force: bool,
}

async fn execute(
    State(state): State<Arc<ProbeState>>,
    Query(params): Query<ExecuteParams>,
) -> impl IntoResponse {
    match state.scheduler.execute_once(params.force).await {
        Ok(execution_id) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                serde_json::json!({"execution_id": execution_id}),
                "Inspection started",
            )),
        ),
        Err(ProbeError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Inspection already running")),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(err.to_string())),
        ),
    }
}

async fn schedule(State(state): State<Arc<ProbeState>>) -> impl IntoResponse {
    let status = state.scheduler.status().await;
    Json(ApiResponse::ok(
        serde_json::json!({
            "schedule": status["schedule"],
            "paused": status["paused"],
            "next_inspection": status["next_inspection"],
        }),
        "Schedule retrieved",
    ))
}

async fn pause(State(state): State<Arc<ProbeState>>) -> impl IntoResponse {
    state.scheduler.pause();
    Json(ApiResponse::ok(
        serde_json::json!({"paused": true}),
        "Scheduled inspections paused",
    ))
}

async fn resume(State(state): State<Arc<ProbeState>>) -> impl IntoResponse {
    state.scheduler.resume();
    Json(ApiResponse::ok(
        serde_json::json!({"paused": false}),
        "Scheduled inspections resumed",
    ))
}

#[derive(Debug, Deserialize)]
struct ReportsParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn recent_reports(
    State(state): State<Arc<ProbeState>>,
    Query(params): Query<ReportsParams>,
) -> impl IntoResponse {
    let reports = state.scheduler.recent_reports(params.limit.min(100)).await;
    let count = reports.len();
    Json(ApiResponse::ok(
        serde_json::json!({"reports": reports, "count": count}),
        "Reports retrieved",
    ))
}

async fn get_report(
    State(state): State<Arc<ProbeState>>,
    Path(execution_id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.get_report(&execution_id).await {
        Some(record) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                serde_json::to_value(&record).unwrap_or_default(),
                "Report retrieved",
            )),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Report not found")),
        ),
    }
}

async fn ws_upgrade(
    State(state): State<Arc<ProbeState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ProbeState>) {
    let mut feed = state.events.subscribe();

    loop {
        tokio::select! {
            event = feed.recv() => {
                match event {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                // Clients only listen; anything but a clean frame ends the session
                match incoming {
                    Some(Ok(_)) => continue,
                    _ => break,
                }
            }
        }
    }

    debug!("probe ws client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::AutoFixer;
    use crate::metrics::StaticMetrics;
    use crate::ProbeExecutor;
    use cortex_common::models::SystemMetrics;
    use cortex_common::IntentRecorder;
    use std::time::Duration;

    async fn state() -> Arc<ProbeState> {
        let mut settings = Settings::default();
        settings.agent.id = "agent-api".to_string();
        settings.llm.api_key = Some("sk-secret".to_string());

        let queue = Arc::new(LocalQueue::open_in_memory(3, 100).await.unwrap());
        let events = Arc::new(ProbeBroadcaster::new());
        let executor = Arc::new(ProbeExecutor::new(
            settings.clone(),
            Arc::new(StaticMetrics(SystemMetrics::default())),
            AutoFixer::empty(),
            Arc::new(IntentRecorder::disabled()),
            Arc::clone(&queue),
        ));
        let scheduler = Arc::new(
            ProbeScheduler::new(
                executor,
                Arc::clone(&events),
                "0 * * * *",
                Duration::from_secs(30),
            )
            .unwrap(),
        );

        Arc::new(ProbeState {
            settings,
            scheduler,
            events,
            queue,
        })
    }

    #[tokio::test]
    async fn config_endpoint_redacts_secrets() {
        let state = state().await;
        let response = config(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["data"]["llm"]["api_key"], "***");
    }

    #[tokio::test]
    async fn execute_conflicts_while_running() {
        let state = state().await;
        // Simulate a run in progress through the public gate
        let first = execute(
            State(Arc::clone(&state)),
            Query(ExecuteParams { force: false }),
        )
        .await
        .into_response();
        assert_eq!(first.status(), StatusCode::OK);

        let second = execute(
            State(Arc::clone(&state)),
            Query(ExecuteParams { force: false }),
        )
        .await
        .into_response();
        // Either the first already finished (OK) or we get the conflict;
        // with the static metrics source the run is fast, so check both paths
        assert!(
            second.status() == StatusCode::CONFLICT || second.status() == StatusCode::OK,
            "unexpected status: {}",
            second.status()
        );
    }

    #[tokio::test]
    async fn unknown_report_is_404() {
        let state = state().await;
        let response = get_report(State(state), Path("no-such-id".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_includes_queue_stats() {
        let state = state().await;
        let response = status(State(state)).await.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(value["data"]["queue"]["total"].is_number());
        assert_eq!(value["data"]["scheduler_status"], "stopped");
    }
}
