//! # Report Ingest
//!
//! Entry point for probe uploads and lightweight heartbeats. The store does
//! the transactional part; everything after commit is best-effort dispatch
//! whose failures are logged, never surfaced to the probe.

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use cortex_common::models::{ApiResponse, IssueLevel, IssueReport, ProbeReport};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::auth::AgentAuth;
use crate::error::MonitorError;
use crate::store::{DecisionRecord, NewDecision};
use crate::ws::MonitorEvent;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reports", post(receive_report))
        .route("/heartbeat", post(receive_heartbeat))
}

async fn receive_report(
    State(state): State<Arc<AppState>>,
    _auth: AgentAuth,
    Json(report): Json<ProbeReport>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    // Transactional: agent upsert + liveness mirror + report row
    let outcome = state.store.ingest_report(&report).await?;

    // Post-commit dispatch from here on; failures must not fail the upload
    state.broadcaster.publish(&MonitorEvent::ReportReceived {
        agent_id: report.agent_id.clone(),
        report_id: outcome.report_id,
        summary: json!({
            "status": report.status,
            "issues_count": report.issues.len(),
            "actions_count": report.actions_taken.len(),
        }),
    });

    let decisions = dispatch_l2(&state, &report).await;
    for decision in &decisions {
        state.broadcaster.publish(&MonitorEvent::DecisionMade {
            decision_id: decision.id,
            agent_id: report.agent_id.clone(),
            status: decision.status,
            reason: decision.reason.clone().unwrap_or_default(),
        });
    }

    let alerts_triggered = dispatch_l3(&state, &report).await;

    state.invalidate_cluster_views().await;

    Ok(Json(ApiResponse::ok(
        json!({
            "report_id": outcome.report_id,
            "l2_decisions": decisions
                .iter()
                .map(|d| json!({
                    "decision_id": d.id,
                    "issue_type": d.issue_type,
                    "status": d.status,
                    "reason": d.reason,
                }))
                .collect::<Vec<_>>(),
            "l3_alerts_triggered": alerts_triggered,
        }),
        "Report received successfully",
    )))
}

/// L2 path: escalate to the agent's upstream when configured, falling back
/// to the local decision engine per issue; otherwise decide locally.
async fn dispatch_l2(state: &Arc<AppState>, report: &ProbeReport) -> Vec<DecisionRecord> {
    let l2_issues: Vec<&IssueReport> = report
        .issues
        .iter()
        .filter(|issue| issue.level == IssueLevel::L2)
        .collect();
    if l2_issues.is_empty() {
        return Vec::new();
    }

    info!(
        "processing {} L2 issues from {}",
        l2_issues.len(),
        report.agent_id
    );

    let upstream = match state.store.get_agent(&report.agent_id).await {
        Ok(agent) => agent
            .and_then(|agent| agent.upstream_monitor_url)
            .filter(|url| !url.is_empty()),
        Err(err) => {
            error!("failed to resolve agent for L2 dispatch: {}", err);
            None
        }
    };

    let mut decisions = Vec::new();

    match upstream {
        Some(upstream_url) => {
            info!(
                "cluster mode: forwarding {} L2 issues to upstream {}",
                l2_issues.len(),
                upstream_url
            );

            for issue in l2_issues {
                let forwarded = state
                    .forwarder
                    .forward_decision_request(issue, &report.agent_id, &upstream_url)
                    .await;

                match forwarded {
                    Some(upstream_decision) => {
                        // Materialize the parent's verdict as a local row
                        let inserted = state
                            .store
                            .insert_decision(NewDecision {
                                agent_id: report.agent_id.clone(),
                                issue_type: issue.kind.clone(),
                                issue_description: issue.description.clone(),
                                proposed_action: issue.proposed_fix.clone().unwrap_or_default(),
                                llm_analysis: upstream_decision.llm_analysis,
                                status: upstream_decision.status,
                                reason: upstream_decision.reason,
                            })
                            .await;
                        match inserted {
                            Ok(decision) => decisions.push(decision),
                            Err(err) => error!("failed to materialize upstream decision: {}", err),
                        }
                    }
                    None => {
                        error!(
                            "failed to get decision from upstream for {}, falling back to local decision",
                            issue.kind
                        );
                        match state.engine.analyze_and_decide(issue, &report.agent_id).await {
                            Ok(decision) => decisions.push(decision),
                            Err(err) => error!("local fallback decision failed: {}", err),
                        }
                    }
                }
            }
        }
        None => {
            let owned: Vec<IssueReport> = l2_issues.into_iter().cloned().collect();
            decisions = state.engine.batch_analyze(&owned, &report.agent_id).await;
        }
    }

    decisions
}

/// L3 path: aggregate with dedup, then fan out to notifier and subscribers.
async fn dispatch_l3(state: &Arc<AppState>, report: &ProbeReport) -> usize {
    let l3_issues: Vec<IssueReport> = report
        .issues
        .iter()
        .filter(|issue| issue.level == IssueLevel::L3)
        .cloned()
        .collect();
    if l3_issues.is_empty() {
        return 0;
    }

    warn!(
        "processing {} L3 issues from {}",
        l3_issues.len(),
        report.agent_id
    );

    let alerts = match state
        .aggregator
        .process_issues(&l3_issues, &report.agent_id)
        .await
    {
        Ok(alerts) => alerts,
        Err(err) => {
            error!("alert aggregation failed: {}", err);
            return 0;
        }
    };

    if !alerts.is_empty() {
        state.notifier.send_batch_alerts(&alerts).await;

        for alert in &alerts {
            state.broadcaster.publish(&MonitorEvent::AlertTriggered {
                alert_id: alert.id,
                agent_id: report.agent_id.clone(),
                level: alert.level.clone(),
                alert_type: alert.kind.clone(),
                description: alert.description.clone(),
            });
        }
    }

    alerts.len()
}

#[derive(Debug, Deserialize)]
struct HeartbeatParams {
    agent_id: String,
}

async fn receive_heartbeat(
    State(state): State<Arc<AppState>>,
    _auth: AgentAuth,
    Query(params): Query<HeartbeatParams>,
) -> Result<Json<ApiResponse<serde_json::Value>>, MonitorError> {
    let received_at = state.store.record_heartbeat(&params.agent_id, None).await?;
    state.invalidate_cluster_views().await;

    Ok(Json(ApiResponse::ok(
        json!({"received_at": received_at}),
        "Heartbeat received",
    )))
}
