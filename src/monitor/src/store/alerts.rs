//! Alert storage and lifecycle.
//!
//! Status only moves forward: `new -> acknowledged -> resolved`. The dedup
//! query backs the aggregator's window check.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cortex_common::models::Severity;
use serde::Serialize;
use sqlx::Row;
use std::collections::HashMap;
use tracing::info;

use super::Store;
use crate::error::MonitorError;

#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub id: i64,
    pub agent_id: String,
    pub level: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    pub status: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub agent_id: Option<String>,
    pub level: Option<String>,
    pub status: Option<String>,
    pub severity: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub agent_id: String,
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub total_alerts: i64,
    pub time_range_hours: i64,
    pub by_severity: HashMap<String, i64>,
    pub by_status: HashMap<String, i64>,
    pub by_agent: HashMap<String, i64>,
    pub top_agents: Vec<(String, i64)>,
}

impl Store {
    /// Create a fresh L3 alert in status `new`.
    pub async fn insert_alert(&self, alert: NewAlert) -> Result<AlertRecord, MonitorError> {
        let result = sqlx::query(
            "INSERT INTO alerts (agent_id, level, type, description, severity, status, details, created_at)
             VALUES (?, 'L3', ?, ?, ?, 'new', ?, ?)",
        )
        .bind(&alert.agent_id)
        .bind(&alert.kind)
        .bind(&alert.description)
        .bind(alert.severity.as_str())
        .bind(alert.details.as_ref().map(|d| d.to_string()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_alert(id)
            .await?
            .ok_or(MonitorError::NotFound("alert"))
    }

    /// Newest open alerts (at most `limit`) for the same (agent, type)
    /// within the dedup window.
    pub async fn recent_open_alerts(
        &self,
        agent_id: &str,
        kind: &str,
        window_minutes: i64,
        limit: i64,
    ) -> Result<Vec<AlertRecord>, MonitorError> {
        let cutoff = Utc::now() - ChronoDuration::minutes(window_minutes);

        let rows = sqlx::query(
            "SELECT * FROM alerts
             WHERE agent_id = ? AND type = ?
               AND status IN ('new', 'acknowledged')
               AND created_at >= ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(agent_id)
        .bind(kind)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_alert).collect()
    }

    pub async fn get_alert(&self, id: i64) -> Result<Option<AlertRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_alert).transpose()
    }

    pub async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AlertRecord>, MonitorError> {
        let mut sql = String::from("SELECT * FROM alerts WHERE 1=1");
        if filter.agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        if filter.level.is_some() {
            sql.push_str(" AND level = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.severity.is_some() {
            sql.push_str(" AND severity = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(agent_id) = &filter.agent_id {
            query = query.bind(agent_id);
        }
        if let Some(level) = &filter.level {
            query = query.bind(level);
        }
        if let Some(status) = &filter.status {
            query = query.bind(status);
        }
        if let Some(severity) = &filter.severity {
            query = query.bind(severity);
        }
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let rows = query
            .bind(limit)
            .bind(filter.offset.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_alert).collect()
    }

    /// `new -> acknowledged`, recording who and an optional note.
    pub async fn acknowledge_alert(
        &self,
        id: i64,
        acknowledged_by: &str,
        notes: Option<&str>,
    ) -> Result<AlertRecord, MonitorError> {
        let alert = self
            .get_alert(id)
            .await?
            .ok_or(MonitorError::NotFound("alert"))?;

        if alert.status != "new" {
            return Err(MonitorError::Conflict(
                "alert already acknowledged or resolved".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE alerts
             SET status = 'acknowledged', acknowledged_at = ?, acknowledged_by = ?,
                 notes = COALESCE(?, notes)
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(acknowledged_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!("alert {} acknowledged by {}", id, acknowledged_by);
        self.get_alert(id)
            .await?
            .ok_or(MonitorError::NotFound("alert"))
    }

    /// `{new, acknowledged} -> resolved`; a note is appended below any
    /// existing one. Transitions out of `resolved` are rejected.
    pub async fn resolve_alert(
        &self,
        id: i64,
        notes: Option<&str>,
    ) -> Result<AlertRecord, MonitorError> {
        let alert = self
            .get_alert(id)
            .await?
            .ok_or(MonitorError::NotFound("alert"))?;

        if alert.status == "resolved" {
            return Err(MonitorError::Conflict("alert already resolved".to_string()));
        }

        let combined_notes = notes.map(|note| match &alert.notes {
            Some(existing) => format!("{existing}\n\n[Resolved] {note}"),
            None => format!("[Resolved] {note}"),
        });

        sqlx::query(
            "UPDATE alerts
             SET status = 'resolved', resolved_at = ?, notes = COALESCE(?, notes)
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(combined_notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!("alert {} resolved", id);
        self.get_alert(id)
            .await?
            .ok_or(MonitorError::NotFound("alert"))
    }

    /// Counts grouped by severity, status, and agent over the lookback window.
    pub async fn alert_summary(&self, hours: i64) -> Result<AlertSummary, MonitorError> {
        let cutoff = Utc::now() - ChronoDuration::hours(hours);

        let rows =
            sqlx::query("SELECT severity, status, agent_id FROM alerts WHERE created_at >= ?")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;

        let mut summary = AlertSummary {
            total_alerts: 0,
            time_range_hours: hours,
            by_severity: HashMap::from([
                ("critical".to_string(), 0),
                ("high".to_string(), 0),
                ("medium".to_string(), 0),
                ("low".to_string(), 0),
            ]),
            by_status: HashMap::from([
                ("new".to_string(), 0),
                ("acknowledged".to_string(), 0),
                ("resolved".to_string(), 0),
            ]),
            by_agent: HashMap::new(),
            top_agents: Vec::new(),
        };

        for row in rows {
            summary.total_alerts += 1;
            let severity: String = row.get("severity");
            let status: String = row.get("status");
            let agent_id: String = row.get("agent_id");

            *summary.by_severity.entry(severity).or_insert(0) += 1;
            *summary.by_status.entry(status).or_insert(0) += 1;
            *summary.by_agent.entry(agent_id).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, i64)> = summary.by_agent.clone().into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(5);
        summary.top_agents = ranked;

        Ok(summary)
    }
}

fn row_to_alert(row: sqlx::sqlite::SqliteRow) -> Result<AlertRecord, MonitorError> {
    let severity: String = row.get("severity");
    let details: Option<String> = row.get("details");

    let severity = match severity.as_str() {
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        _ => Severity::Critical,
    };

    Ok(AlertRecord {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        level: row.get("level"),
        kind: row.get("type"),
        description: row.get("description"),
        severity,
        status: row.get("status"),
        details: details.and_then(|text| serde_json::from_str(&text).ok()),
        created_at: row.get("created_at"),
        acknowledged_at: row.get("acknowledged_at"),
        acknowledged_by: row.get("acknowledged_by"),
        resolved_at: row.get("resolved_at"),
        notes: row.get("notes"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_alert(agent_id: &str, kind: &str) -> NewAlert {
        NewAlert {
            agent_id: agent_id.to_string(),
            kind: kind.to_string(),
            description: format!("{kind} on {agent_id}"),
            severity: Severity::Critical,
            details: None,
        }
    }

    #[tokio::test]
    async fn insert_starts_in_new_state() {
        let store = Store::open_in_memory().await.unwrap();
        let alert = store
            .insert_alert(new_alert("a", "database_connection_failed"))
            .await
            .unwrap();

        assert_eq!(alert.status, "new");
        assert_eq!(alert.level, "L3");
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn lifecycle_is_one_way() {
        let store = Store::open_in_memory().await.unwrap();
        let alert = store.insert_alert(new_alert("a", "svc")).await.unwrap();

        let acked = store
            .acknowledge_alert(alert.id, "operator", Some("looking into it"))
            .await
            .unwrap();
        assert_eq!(acked.status, "acknowledged");
        assert_eq!(acked.acknowledged_by.as_deref(), Some("operator"));

        // Second acknowledge is a conflict
        assert!(matches!(
            store.acknowledge_alert(alert.id, "other", None).await,
            Err(MonitorError::Conflict(_))
        ));

        let resolved = store
            .resolve_alert(alert.id, Some("restarted the service"))
            .await
            .unwrap();
        assert_eq!(resolved.status, "resolved");
        assert!(resolved.resolved_at.is_some());
        assert!(resolved
            .notes
            .unwrap()
            .contains("[Resolved] restarted the service"));

        // No way out of resolved
        assert!(store.resolve_alert(alert.id, None).await.is_err());
        assert!(store.acknowledge_alert(alert.id, "x", None).await.is_err());
    }

    #[tokio::test]
    async fn new_alert_can_be_resolved_directly() {
        let store = Store::open_in_memory().await.unwrap();
        let alert = store.insert_alert(new_alert("a", "svc")).await.unwrap();

        let resolved = store.resolve_alert(alert.id, None).await.unwrap();
        assert_eq!(resolved.status, "resolved");
    }

    #[tokio::test]
    async fn recent_open_alerts_sees_only_open_in_window() {
        let store = Store::open_in_memory().await.unwrap();
        let open = store.insert_alert(new_alert("a", "db_down")).await.unwrap();
        let resolved = store.insert_alert(new_alert("a", "db_down")).await.unwrap();
        store.resolve_alert(resolved.id, None).await.unwrap();
        store.insert_alert(new_alert("b", "db_down")).await.unwrap();
        store.insert_alert(new_alert("a", "other_type")).await.unwrap();

        let matches = store
            .recent_open_alerts("a", "db_down", 30, 5)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, open.id);
    }

    #[tokio::test]
    async fn summary_groups_by_severity_status_agent() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_alert(new_alert("a", "x")).await.unwrap();
        store.insert_alert(new_alert("a", "y")).await.unwrap();
        let mut low = new_alert("b", "z");
        low.severity = Severity::Low;
        store.insert_alert(low).await.unwrap();

        let summary = store.alert_summary(24).await.unwrap();
        assert_eq!(summary.total_alerts, 3);
        assert_eq!(summary.by_severity["critical"], 2);
        assert_eq!(summary.by_severity["low"], 1);
        assert_eq!(summary.by_status["new"], 3);
        assert_eq!(summary.top_agents[0], ("a".to_string(), 2));
    }
}
