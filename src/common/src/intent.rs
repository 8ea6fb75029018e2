//! # Intent Recorder
//!
//! Append-only audit log of decisions, blockers, milestones and notes, kept
//! in its own store. Every write is best-effort: a recording failure is
//! logged and never propagates into the caller's main action.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, error, info};

use crate::models::IssueLevel;
use crate::settings::IntentEngineSettings;
use crate::CommonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Decision,
    Blocker,
    Milestone,
    Note,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Decision => "decision",
            IntentKind::Blocker => "blocker",
            IntentKind::Milestone => "milestone",
            IntentKind::Note => "note",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "decision" => Some(IntentKind::Decision),
            "blocker" => Some(IntentKind::Blocker),
            "milestone" => Some(IntentKind::Milestone),
            "note" => Some(IntentKind::Note),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub kind: IntentKind,
    pub level: Option<String>,
    pub category: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub status: Option<String>,
}

/// Query filter for the audit endpoints.
#[derive(Debug, Clone, Default)]
pub struct IntentFilter {
    pub agent_id: Option<String>,
    pub kind: Option<IntentKind>,
    pub level: Option<String>,
    pub category: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentSummary {
    pub total: i64,
    pub window_hours: i64,
    pub by_kind: HashMap<String, i64>,
    pub by_level: HashMap<String, i64>,
    pub by_agent: HashMap<String, i64>,
    pub top_categories: Vec<(String, i64)>,
}

pub struct IntentRecorder {
    enabled: bool,
    pool: Option<SqlitePool>,
}

impl IntentRecorder {
    /// Open the audit store named by configuration; disabled configuration
    /// yields a recorder whose writes and queries are all no-ops.
    pub async fn open(settings: &IntentEngineSettings) -> Result<Self, CommonError> {
        if !settings.enabled {
            info!("intent engine disabled, recording is a no-op");
            return Ok(Self {
                enabled: false,
                pool: None,
            });
        }

        let options = SqliteConnectOptions::from_str(&settings.database_url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let recorder = Self {
            enabled: true,
            pool: Some(pool),
        };
        recorder.init_schema().await?;
        Ok(recorder)
    }

    /// In-memory recorder for tests.
    pub async fn open_in_memory() -> Result<Self, CommonError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let recorder = Self {
            enabled: true,
            pool: Some(pool),
        };
        recorder.init_schema().await?;
        Ok(recorder)
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            pool: None,
        }
    }

    async fn init_schema(&self) -> Result<(), CommonError> {
        let pool = self.pool.as_ref().expect("schema init requires a pool");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS intent_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                intent_type TEXT NOT NULL,
                level TEXT,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                metadata_json TEXT,
                status TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_intents_agent_time ON intent_records(agent_id, timestamp)",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_intents_type ON intent_records(intent_type)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Append one record. Returns the row id, or `None` when disabled or on
    /// any storage failure.
    pub async fn record_intent(
        &self,
        agent_id: &str,
        kind: IntentKind,
        category: &str,
        description: &str,
        level: Option<&str>,
        metadata: Option<&serde_json::Value>,
        status: Option<&str>,
    ) -> Option<i64> {
        if !self.enabled {
            debug!("intent recording disabled, skipping: {}", category);
            return None;
        }

        let pool = self.pool.as_ref()?;
        let result = sqlx::query(
            "INSERT INTO intent_records
                 (timestamp, agent_id, intent_type, level, category, description, metadata_json, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Utc::now())
        .bind(agent_id)
        .bind(kind.as_str())
        .bind(level)
        .bind(category)
        .bind(description)
        .bind(metadata.map(|m| m.to_string()))
        .bind(status)
        .execute(pool)
        .await;

        match result {
            Ok(outcome) => {
                let id = outcome.last_insert_rowid();
                debug!(
                    "intent recorded: [{}] {} for {} (id: {})",
                    kind.as_str(),
                    category,
                    agent_id,
                    id
                );
                Some(id)
            }
            Err(err) => {
                error!("failed to record intent: {}", err);
                None
            }
        }
    }

    pub async fn record_decision(
        &self,
        agent_id: &str,
        level: IssueLevel,
        category: &str,
        description: &str,
        status: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Option<i64> {
        self.record_intent(
            agent_id,
            IntentKind::Decision,
            category,
            description,
            Some(level.as_str()),
            metadata,
            Some(status),
        )
        .await
    }

    pub async fn record_blocker(
        &self,
        agent_id: &str,
        category: &str,
        description: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Option<i64> {
        self.record_intent(
            agent_id,
            IntentKind::Blocker,
            category,
            description,
            Some(IssueLevel::L3.as_str()),
            metadata,
            None,
        )
        .await
    }

    pub async fn record_milestone(
        &self,
        agent_id: &str,
        category: &str,
        description: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Option<i64> {
        self.record_intent(
            agent_id,
            IntentKind::Milestone,
            category,
            description,
            None,
            metadata,
            None,
        )
        .await
    }

    pub async fn record_note(
        &self,
        agent_id: &str,
        category: &str,
        description: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Option<i64> {
        self.record_intent(agent_id, IntentKind::Note, category, description, None, metadata, None)
            .await
    }

    /// Filtered, paginated query, newest first. Returns an empty list when
    /// disabled or on storage failure.
    pub async fn query(&self, filter: &IntentFilter) -> Vec<IntentRecord> {
        let Some(pool) = self.pool.as_ref() else {
            return Vec::new();
        };

        let mut sql = String::from(
            "SELECT id, timestamp, agent_id, intent_type, level, category, description, metadata_json, status
             FROM intent_records WHERE 1=1",
        );
        if filter.agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        if filter.kind.is_some() {
            sql.push_str(" AND intent_type = ?");
        }
        if filter.level.is_some() {
            sql.push_str(" AND level = ?");
        }
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(agent_id) = &filter.agent_id {
            query = query.bind(agent_id);
        }
        if let Some(kind) = &filter.kind {
            query = query.bind(kind.as_str());
        }
        if let Some(level) = &filter.level {
            query = query.bind(level);
        }
        if let Some(category) = &filter.category {
            query = query.bind(category);
        }
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        query = query.bind(limit).bind(filter.offset.max(0));

        match query.fetch_all(pool).await {
            Ok(rows) => rows.into_iter().filter_map(Self::row_to_record).collect(),
            Err(err) => {
                error!("failed to query intents: {}", err);
                Vec::new()
            }
        }
    }

    pub async fn get(&self, id: i64) -> Option<IntentRecord> {
        let pool = self.pool.as_ref()?;
        let row = sqlx::query(
            "SELECT id, timestamp, agent_id, intent_type, level, category, description, metadata_json, status
             FROM intent_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .ok()??;

        Self::row_to_record(row)
    }

    /// Aggregated counts over the lookback window.
    pub async fn summary(&self, window_hours: i64) -> IntentSummary {
        let mut summary = IntentSummary {
            total: 0,
            window_hours,
            by_kind: HashMap::new(),
            by_level: HashMap::new(),
            by_agent: HashMap::new(),
            top_categories: Vec::new(),
        };

        let Some(pool) = self.pool.as_ref() else {
            return summary;
        };
        let cutoff = Utc::now() - ChronoDuration::hours(window_hours);

        let rows = match sqlx::query(
            "SELECT intent_type, level, agent_id, category FROM intent_records WHERE timestamp >= ?",
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                error!("failed to summarize intents: {}", err);
                return summary;
            }
        };

        let mut categories: HashMap<String, i64> = HashMap::new();
        for row in rows {
            summary.total += 1;
            let kind: String = row.get("intent_type");
            *summary.by_kind.entry(kind).or_insert(0) += 1;
            if let Some(level) = row.get::<Option<String>, _>("level") {
                *summary.by_level.entry(level).or_insert(0) += 1;
            }
            let agent: String = row.get("agent_id");
            *summary.by_agent.entry(agent).or_insert(0) += 1;
            let category: String = row.get("category");
            *categories.entry(category).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, i64)> = categories.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(10);
        summary.top_categories = ranked;

        summary
    }

    fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Option<IntentRecord> {
        let kind: String = row.get("intent_type");
        let metadata_text: Option<String> = row.get("metadata_json");

        Some(IntentRecord {
            id: row.get("id"),
            timestamp: row.get("timestamp"),
            agent_id: row.get("agent_id"),
            kind: IntentKind::parse(&kind)?,
            level: row.get("level"),
            category: row.get("category"),
            description: row.get("description"),
            metadata: metadata_text.and_then(|text| serde_json::from_str(&text).ok()),
            status: row.get("status"),
        })
    }
}
