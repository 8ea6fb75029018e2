//! Decision records for the L2 path.

use chrono::{DateTime, Utc};
use cortex_common::models::DecisionStatus;
use serde::Serialize;
use sqlx::Row;
use tracing::info;

use super::Store;
use crate::error::MonitorError;

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub id: i64,
    pub agent_id: String,
    pub issue_type: String,
    pub issue_description: String,
    pub proposed_action: String,
    pub llm_analysis: Option<String>,
    pub status: DecisionStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_result: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Fields for a new decision row, whether decided locally or materialized
/// from an upstream response.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub agent_id: String,
    pub issue_type: String,
    pub issue_description: String,
    pub proposed_action: String,
    pub llm_analysis: Option<String>,
    pub status: DecisionStatus,
    pub reason: String,
}

impl Store {
    pub async fn insert_decision(
        &self,
        decision: NewDecision,
    ) -> Result<DecisionRecord, MonitorError> {
        let result = sqlx::query(
            "INSERT INTO decisions
                 (agent_id, issue_type, issue_description, proposed_action, llm_analysis,
                  status, reason, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&decision.agent_id)
        .bind(&decision.issue_type)
        .bind(&decision.issue_description)
        .bind(&decision.proposed_action)
        .bind(&decision.llm_analysis)
        .bind(decision.status.as_str())
        .bind(&decision.reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(
            "decision {} recorded for {}/{}: {}",
            id,
            decision.agent_id,
            decision.issue_type,
            decision.status.as_str()
        );

        self.get_decision(id)
            .await?
            .ok_or(MonitorError::NotFound("decision"))
    }

    pub async fn get_decision(&self, id: i64) -> Result<Option<DecisionRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM decisions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_decision).transpose()
    }

    pub async fn list_decisions(
        &self,
        filter: &DecisionFilter,
    ) -> Result<Vec<DecisionRecord>, MonitorError> {
        let mut sql = String::from("SELECT * FROM decisions WHERE 1=1");
        if filter.agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(agent_id) = &filter.agent_id {
            query = query.bind(agent_id);
        }
        if let Some(status) = &filter.status {
            query = query.bind(status);
        }
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let rows = query
            .bind(limit)
            .bind(filter.offset.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_decision).collect()
    }

    /// Agent feedback after executing an approved action.
    pub async fn record_decision_feedback(
        &self,
        id: i64,
        execution_result: &str,
    ) -> Result<DecisionRecord, MonitorError> {
        let result = sqlx::query(
            "UPDATE decisions SET executed_at = ?, execution_result = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(execution_result)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MonitorError::NotFound("decision"));
        }

        self.get_decision(id)
            .await?
            .ok_or(MonitorError::NotFound("decision"))
    }
}

fn row_to_decision(row: sqlx::sqlite::SqliteRow) -> Result<DecisionRecord, MonitorError> {
    let status: String = row.get("status");

    Ok(DecisionRecord {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        issue_type: row.get("issue_type"),
        issue_description: row.get("issue_description"),
        proposed_action: row.get("proposed_action"),
        llm_analysis: row.get("llm_analysis"),
        status: if status == "approved" {
            DecisionStatus::Approved
        } else {
            DecisionStatus::Rejected
        },
        reason: row.get("reason"),
        created_at: row.get("created_at"),
        executed_at: row.get("executed_at"),
        execution_result: row.get("execution_result"),
    })
}
