//! # Cortex Probe
//!
//! The per-host inspection daemon. A cron-driven scheduler runs the executor,
//! which collects metrics, classifies findings into tiers, auto-remediates
//! the safe tier, and ships the rest to the Monitor through the durable
//! queue. A small HTTP/WebSocket API exposes status, manual triggers, and
//! the inspection history.

pub mod api;
pub mod classifier;
pub mod events;
pub mod executor;
pub mod fixer;
pub mod metrics;
pub mod scheduler;
pub mod types;

pub use classifier::IssueClassifier;
pub use events::ProbeBroadcaster;
pub use executor::ProbeExecutor;
pub use fixer::{AutoFixer, FixHandler, FixOutcome, FixResult};
pub use metrics::{MetricsSource, SysinfoCollector};
pub use scheduler::ProbeScheduler;
pub use types::{ExecutionRecord, ExecutionStatus, ProbeError};
