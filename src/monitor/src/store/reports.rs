//! Report persistence and the transactional half of ingest.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cortex_common::models::ProbeReport;
use serde::Serialize;
use sqlx::Row;
use tracing::{info, warn};

use super::Store;
use crate::error::MonitorError;

#[derive(Debug, Clone, Serialize)]
pub struct ReportRecord {
    pub id: i64,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub metrics: serde_json::Value,
    pub issues: serde_json::Value,
    pub actions_taken: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the transactional ingest step.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub report_id: i64,
    pub agent_created: bool,
}

impl Store {
    /// The transactional core of report ingest, all-or-nothing:
    ///
    /// 1. resolve the agent, auto-creating a minimal record if missing;
    /// 2. mirror liveness (heartbeat, online, health from the report);
    /// 3. persist the report row.
    ///
    /// Dispatch (decisions, alerts, broadcasts) happens after commit,
    /// outside this method.
    pub async fn ingest_report(&self, report: &ProbeReport) -> Result<IngestOutcome, MonitorError> {
        let now = Utc::now();
        let health = report.status.as_str();
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query("SELECT id FROM agents WHERE id = ?")
            .bind(&report.agent_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("id"));

        let agent_created = exists.is_none();
        if agent_created {
            warn!("agent not found: {}, creating new entry", report.agent_id);
            sqlx::query(
                "INSERT INTO agents
                     (id, name, api_key, status, health_status, last_heartbeat, created_at, updated_at)
                 VALUES (?, ?, ?, 'online', ?, ?, ?, ?)",
            )
            .bind(&report.agent_id)
            .bind(&report.agent_id)
            .bind(format!("auto_generated_{}", report.agent_id))
            .bind(health)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE agents
                 SET status = 'online', health_status = ?, last_heartbeat = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(health)
            .bind(now)
            .bind(now)
            .bind(&report.agent_id)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            "INSERT INTO reports
                 (agent_id, timestamp, status, metrics, issues, actions_taken, metadata_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.agent_id)
        .bind(report.timestamp)
        .bind(report.status.as_str())
        .bind(serde_json::to_string(&report.metrics)?)
        .bind(serde_json::to_string(&report.issues)?)
        .bind(serde_json::to_string(&report.actions_taken)?)
        .bind(serde_json::to_string(&report.metadata)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let report_id = result.last_insert_rowid();
        info!(
            "report {} received from {}, status: {}, issues: {}, actions: {}",
            report_id,
            report.agent_id,
            report.status,
            report.issues.len(),
            report.actions_taken.len()
        );

        Ok(IngestOutcome {
            report_id,
            agent_created,
        })
    }

    pub async fn get_report(&self, report_id: i64) -> Result<Option<ReportRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = ?")
            .bind(report_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_report).transpose()
    }

    pub async fn list_reports(
        &self,
        agent_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ReportRecord>, MonitorError> {
        let mut sql = String::from("SELECT * FROM reports WHERE 1=1");
        if agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(agent_id) = agent_id {
            query = query.bind(agent_id);
        }
        let rows = query
            .bind(limit)
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_report).collect()
    }

    /// (total reports, reports in the last 24 hours) for one agent.
    pub async fn report_stats(&self, agent_id: &str) -> Result<(i64, i64), MonitorError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS c FROM reports WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_one(&self.pool)
            .await?
            .get("c");

        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let recent: i64 =
            sqlx::query("SELECT COUNT(*) AS c FROM reports WHERE agent_id = ? AND timestamp >= ?")
                .bind(agent_id)
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?
                .get("c");

        Ok((total, recent))
    }

    pub async fn reports_in_last_hour(&self) -> Result<i64, MonitorError> {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM reports WHERE timestamp >= ?")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?
            .get("c");
        Ok(count)
    }

    /// Age-based purge backing the retention setting.
    pub async fn purge_reports_older_than(&self, days: i64) -> Result<u64, MonitorError> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let result = sqlx::query("DELETE FROM reports WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            info!("purged {} reports older than {} days", purged, days);
        }
        Ok(purged)
    }
}

fn row_to_report(row: sqlx::sqlite::SqliteRow) -> Result<ReportRecord, MonitorError> {
    let metrics: String = row.get("metrics");
    let issues: Option<String> = row.get("issues");
    let actions: Option<String> = row.get("actions_taken");
    let metadata: Option<String> = row.get("metadata_json");

    Ok(ReportRecord {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        timestamp: row.get("timestamp"),
        status: row.get("status"),
        metrics: serde_json::from_str(&metrics)?,
        issues: issues
            .map(|text| serde_json::from_str(&text))
            .transpose()?
            .unwrap_or_else(|| serde_json::json!([])),
        actions_taken: actions
            .map(|text| serde_json::from_str(&text))
            .transpose()?
            .unwrap_or_else(|| serde_json::json!([])),
        metadata: metadata.and_then(|text| serde_json::from_str(&text).ok()),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_common::models::{HealthState, SystemMetrics};
    use std::collections::HashMap;

    fn report(agent_id: &str, status: HealthState) -> ProbeReport {
        ProbeReport {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            status,
            metrics: SystemMetrics::default(),
            issues: vec![],
            actions_taken: vec![],
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn ingest_auto_registers_missing_agent_online() {
        let store = Store::open_in_memory().await.unwrap();

        let outcome = store
            .ingest_report(&report("fresh-agent", HealthState::Healthy))
            .await
            .unwrap();
        assert!(outcome.agent_created);

        let agent = store.get_agent("fresh-agent").await.unwrap().unwrap();
        assert_eq!(agent.status, cortex_common::models::AgentPresence::Online);
        assert_eq!(agent.api_key, "auto_generated_fresh-agent");
        assert!(agent.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn ingest_mirrors_report_status_into_health() {
        let store = Store::open_in_memory().await.unwrap();

        store
            .ingest_report(&report("a", HealthState::Critical))
            .await
            .unwrap();

        let agent = store.get_agent("a").await.unwrap().unwrap();
        assert_eq!(
            agent.health_status,
            cortex_common::models::AgentHealth::Critical
        );
    }

    #[tokio::test]
    async fn double_ingest_creates_two_rows_one_agent() {
        let store = Store::open_in_memory().await.unwrap();
        let probe_report = report("twice", HealthState::Healthy);

        let first = store.ingest_report(&probe_report).await.unwrap();
        let second = store.ingest_report(&probe_report).await.unwrap();

        assert!(first.agent_created);
        assert!(!second.agent_created);
        assert_ne!(first.report_id, second.report_id);
        assert_eq!(store.all_agents().await.unwrap().len(), 1);
        assert_eq!(store.report_stats("twice").await.unwrap().0, 2);
    }

    #[tokio::test]
    async fn report_round_trips_through_storage() {
        let store = Store::open_in_memory().await.unwrap();
        let mut probe_report = report("rt", HealthState::Warning);
        probe_report
            .metadata
            .insert("probe_version".to_string(), serde_json::json!("0.1.0"));

        let outcome = store.ingest_report(&probe_report).await.unwrap();
        let stored = store.get_report(outcome.report_id).await.unwrap().unwrap();

        assert_eq!(stored.agent_id, "rt");
        assert_eq!(stored.status, "warning");
        assert_eq!(stored.metadata.unwrap()["probe_version"], "0.1.0");
    }

    #[tokio::test]
    async fn purge_respects_retention_window() {
        let store = Store::open_in_memory().await.unwrap();
        let mut old_report = report("old", HealthState::Healthy);
        old_report.timestamp = Utc::now() - ChronoDuration::days(60);
        store.ingest_report(&old_report).await.unwrap();
        store.ingest_report(&report("old", HealthState::Healthy)).await.unwrap();

        let purged = store.purge_reports_older_than(30).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.report_stats("old").await.unwrap().0, 1);
    }

    #[tokio::test]
    async fn list_reports_paginates_newest_first() {
        let store = Store::open_in_memory().await.unwrap();
        for _ in 0..3 {
            store.ingest_report(&report("p", HealthState::Healthy)).await.unwrap();
        }

        let page = store.list_reports(Some("p"), 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].id > page[1].id);
    }
}
