//! Agent registry: identity, parent linkage, liveness, and health.

use chrono::{DateTime, Utc};
use cortex_common::models::{AgentHealth, AgentPresence};
use serde::Serialize;
use sqlx::Row;
use tracing::{info, warn};

use super::Store;
use crate::error::MonitorError;

#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub upstream_monitor_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub status: AgentPresence,
    pub health_status: AgentHealth,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Registration payload after token validation.
#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub name: String,
    pub api_key: String,
    pub parent_id: Option<String>,
    pub upstream_monitor_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Store {
    /// Register a new agent or update an existing one in place. Returns the
    /// record and whether it was newly created.
    ///
    /// A non-null parent must already exist; self-parenting is refused
    /// outright so registration cannot create a trivial cycle.
    pub async fn register_agent(
        &self,
        registration: AgentRegistration,
    ) -> Result<(AgentRecord, bool), MonitorError> {
        if let Some(parent_id) = &registration.parent_id {
            if parent_id == &registration.agent_id {
                return Err(MonitorError::Validation(
                    "agent cannot be its own parent".to_string(),
                ));
            }
            if self.get_agent(parent_id).await?.is_none() {
                return Err(MonitorError::Validation(format!(
                    "parent agent '{parent_id}' does not exist"
                )));
            }
        }

        let now = Utc::now();
        let existing = self.get_agent(&registration.agent_id).await?;
        let created = existing.is_none();

        if created {
            sqlx::query(
                "INSERT INTO agents
                     (id, name, parent_id, upstream_monitor_url, api_key, status, health_status,
                      created_at, updated_at, metadata_json)
                 VALUES (?, ?, ?, ?, ?, 'offline', 'unknown', ?, ?, ?)",
            )
            .bind(&registration.agent_id)
            .bind(&registration.name)
            .bind(&registration.parent_id)
            .bind(&registration.upstream_monitor_url)
            .bind(&registration.api_key)
            .bind(now)
            .bind(now)
            .bind(registration.metadata.as_ref().map(|m| m.to_string()))
            .execute(&self.pool)
            .await?;

            info!(
                "new agent registered: {} ({})",
                registration.agent_id, registration.name
            );
        } else {
            sqlx::query(
                "UPDATE agents
                 SET name = ?, parent_id = ?, upstream_monitor_url = ?, api_key = ?,
                     updated_at = ?, metadata_json = ?
                 WHERE id = ?",
            )
            .bind(&registration.name)
            .bind(&registration.parent_id)
            .bind(&registration.upstream_monitor_url)
            .bind(&registration.api_key)
            .bind(now)
            .bind(registration.metadata.as_ref().map(|m| m.to_string()))
            .bind(&registration.agent_id)
            .execute(&self.pool)
            .await?;

            info!("agent re-registered, fields updated: {}", registration.agent_id);
        }

        let record = self
            .get_agent(&registration.agent_id)
            .await?
            .ok_or(MonitorError::NotFound("agent"))?;
        Ok((record, created))
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_agent).transpose()
    }

    pub async fn list_agents(
        &self,
        status: Option<&str>,
        health: Option<&str>,
    ) -> Result<Vec<AgentRecord>, MonitorError> {
        let mut sql = String::from("SELECT * FROM agents WHERE 1=1");
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if health.is_some() {
            sql.push_str(" AND health_status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status);
        }
        if let Some(health) = health {
            query = query.bind(health);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_agent).collect()
    }

    pub async fn all_agents(&self) -> Result<Vec<AgentRecord>, MonitorError> {
        self.list_agents(None, None).await
    }

    pub async fn find_agent_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<AgentRecord>, MonitorError> {
        let row = sqlx::query("SELECT * FROM agents WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_agent).transpose()
    }

    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), MonitorError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MonitorError::NotFound("agent"));
        }
        warn!("agent deleted: {}", agent_id);
        Ok(())
    }

    /// Record a heartbeat: status goes online, the timestamp advances, and
    /// health updates only when the heartbeat carries one.
    pub async fn record_heartbeat(
        &self,
        agent_id: &str,
        health: Option<AgentHealth>,
    ) -> Result<DateTime<Utc>, MonitorError> {
        let now = Utc::now();

        let result = match health {
            Some(health) => {
                sqlx::query(
                    "UPDATE agents
                     SET status = 'online', last_heartbeat = ?, health_status = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(now)
                .bind(health.as_str())
                .bind(now)
                .bind(agent_id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE agents
                     SET status = 'online', last_heartbeat = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(now)
                .bind(now)
                .bind(agent_id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(MonitorError::NotFound("agent"));
        }
        Ok(now)
    }

    pub async fn online_agents(&self) -> Result<Vec<AgentRecord>, MonitorError> {
        self.list_agents(Some("online"), None).await
    }

    /// Transition one agent to offline. Health is left untouched: the last
    /// known state stands until the next report.
    pub async fn mark_agent_offline(&self, agent_id: &str) -> Result<(), MonitorError> {
        sqlx::query("UPDATE agents SET status = 'offline', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Counts backing the cluster overview endpoint.
    pub async fn agent_counts(&self) -> Result<AgentCounts, MonitorError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS c FROM agents")
            .fetch_one(&self.pool)
            .await?
            .get("c");

        let online: i64 =
            sqlx::query("SELECT COUNT(*) AS c FROM agents WHERE status = 'online'")
                .fetch_one(&self.pool)
                .await?
                .get("c");

        let mut counts = AgentCounts {
            total,
            online,
            offline: total - online,
            healthy: 0,
            warning: 0,
            critical: 0,
            unknown: 0,
        };

        let rows =
            sqlx::query("SELECT health_status, COUNT(*) AS c FROM agents GROUP BY health_status")
                .fetch_all(&self.pool)
                .await?;
        for row in rows {
            let health: String = row.get("health_status");
            let count: i64 = row.get("c");
            match AgentHealth::parse(&health) {
                AgentHealth::Healthy => counts.healthy = count,
                AgentHealth::Warning => counts.warning = count,
                AgentHealth::Critical => counts.critical = count,
                AgentHealth::Unknown => counts.unknown = count,
            }
        }

        Ok(counts)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentCounts {
    pub total: i64,
    pub online: i64,
    pub offline: i64,
    pub healthy: i64,
    pub warning: i64,
    pub critical: i64,
    pub unknown: i64,
}

pub(super) fn row_to_agent(row: sqlx::sqlite::SqliteRow) -> Result<AgentRecord, MonitorError> {
    let status: String = row.get("status");
    let health: String = row.get("health_status");
    let metadata_text: Option<String> = row.get("metadata_json");

    Ok(AgentRecord {
        id: row.get("id"),
        name: row.get("name"),
        parent_id: row.get("parent_id"),
        upstream_monitor_url: row.get("upstream_monitor_url"),
        api_key: row.get("api_key"),
        status: if status == "online" {
            AgentPresence::Online
        } else {
            AgentPresence::Offline
        },
        health_status: AgentHealth::parse(&health),
        last_heartbeat: row.get("last_heartbeat"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        metadata: metadata_text.and_then(|text| serde_json::from_str(&text).ok()),
    })
}
