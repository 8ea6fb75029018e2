//! # Primary Store
//!
//! SQLite-backed persistence for the Monitor: agents, reports, decisions,
//! alerts, users, and API keys. All timestamps are UTC; nested documents
//! (metrics, issues, actions, details) live in JSON text columns.

mod agents;
mod alerts;
mod decisions;
mod reports;
mod users;

pub use agents::{AgentCounts, AgentRecord, AgentRegistration};
pub use alerts::{AlertFilter, AlertRecord, AlertSummary, NewAlert};
pub use decisions::{DecisionFilter, DecisionRecord, NewDecision};
pub use reports::{IngestOutcome, ReportRecord};
pub use users::{ApiKeyRecord, UserRecord};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::MonitorError;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database named by `database_url` and
    /// ensure the schema exists.
    pub async fn open(database_url: &str) -> Result<Self, MonitorError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, MonitorError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One long-lived connection; a second in-memory connection would see
        // a fresh, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), MonitorError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id TEXT,
                upstream_monitor_url TEXT,
                api_key TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'offline',
                health_status TEXT NOT NULL DEFAULT 'unknown',
                last_heartbeat TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                metadata_json TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_agents_status ON agents(status)",
            "CREATE INDEX IF NOT EXISTS ix_agents_status_parent ON agents(status, parent_id)",
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                metrics TEXT NOT NULL,
                issues TEXT,
                actions_taken TEXT,
                metadata_json TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_reports_agent_timestamp ON reports(agent_id, timestamp)",
            "CREATE INDEX IF NOT EXISTS ix_reports_agent_status ON reports(agent_id, status)",
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                issue_type TEXT NOT NULL,
                issue_description TEXT NOT NULL,
                proposed_action TEXT NOT NULL,
                llm_analysis TEXT,
                status TEXT NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL,
                executed_at TEXT,
                execution_result TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_decisions_agent_created ON decisions(agent_id, created_at)",
            "CREATE INDEX IF NOT EXISTS ix_decisions_status_created ON decisions(status, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                level TEXT NOT NULL,
                type TEXT NOT NULL,
                description TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                details TEXT,
                created_at TEXT NOT NULL,
                acknowledged_at TEXT,
                acknowledged_by TEXT,
                resolved_at TEXT,
                notes TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_alerts_agent_status_created ON alerts(agent_id, status, created_at)",
            "CREATE INDEX IF NOT EXISTS ix_alerts_status_level_severity ON alerts(status, level, severity)",
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'viewer',
                created_at TEXT NOT NULL,
                last_login TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                owner_name TEXT,
                role TEXT NOT NULL DEFAULT 'viewer',
                is_active INTEGER NOT NULL DEFAULT 1,
                last_used_at TEXT,
                usage_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                expires_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_api_keys_key_active ON api_keys(key, is_active)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}
