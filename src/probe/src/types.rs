//! Probe-side types: errors, execution lifecycle, and live events.

use chrono::{DateTime, Utc};
use cortex_common::models::ProbeReport;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("inspection already running")]
    AlreadyRunning,

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("metrics collection failed: {0}")]
    Metrics(String),

    #[error("fix handler failed: {0}")]
    Fixer(String),

    #[error("queue error: {0}")]
    Queue(#[from] cortex_common::CommonError),

    #[error("execution timed out after {0}s")]
    Timeout(u64),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle of a single inspection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }
}

/// Result of one inspection, retained in the scheduler's history ring.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub report: Option<ProbeReport>,
}

impl ExecutionRecord {
    pub fn started(execution_id: String) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            error_message: None,
            report: None,
        }
    }

    pub fn finish(&mut self, status: ExecutionStatus, report: Option<ProbeReport>, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_seconds = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
        self.report = report;
        self.error_message = error;
    }

    /// Compact view for list endpoints; the full report stays out.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "execution_id": self.execution_id,
            "status": self.status,
            "started_at": self.started_at,
            "completed_at": self.completed_at,
            "duration_seconds": self.duration_seconds,
            "has_report": self.report.is_some(),
        })
    }
}

/// Events published on the probe's live feed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeEvent {
    InspectionStarted {
        execution_id: String,
    },
    InspectionCompleted {
        execution_id: String,
        status: ExecutionStatus,
        report: Box<ProbeReport>,
    },
    InspectionFailed {
        execution_id: String,
        error: String,
    },
}
