//! # Cortex Common
//!
//! Shared building blocks used by both the Probe and the Monitor: wire
//! models, configuration loading, the retry policy, the durable local queue
//! and its sender, the TTL response cache, and the intent recorder.

pub mod cache;
pub mod intent;
pub mod logging;
pub mod models;
pub mod queue;
pub mod queue_sender;
pub mod retry;
pub mod settings;

pub use cache::{cache_key, TtlCache};
pub use intent::{IntentFilter, IntentKind, IntentRecord, IntentRecorder, IntentSummary};
pub use models::{
    ActionReport, ActionResult, AgentHealth, AgentPresence, ApiResponse, DecisionRequest,
    DecisionStatus, HealthState, IssueLevel, IssueReport, ProbeReport, Severity, SystemMetrics,
    UpstreamDecision,
};
pub use queue::{LocalQueue, QueueItem, QueueItemStatus, QueueStats};
pub use queue_sender::QueueSender;
pub use retry::{retry_async, RequestError, RetryPolicy};
pub use settings::Settings;

use thiserror::Error;

/// Errors produced by the shared components.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
