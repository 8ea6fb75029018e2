//! # Cortex Monitor
//!
//! The aggregation and decision tier. Ingests probe reports, keeps the agent
//! registry and its liveness, decides L2 issues (locally via the LLM or by
//! escalating to a parent Monitor), aggregates L3 issues into deduplicated
//! alerts, and fans events out to the notifier and live subscribers.

pub mod app;
pub mod auth;
pub mod error;
pub mod routers;
pub mod services;
pub mod store;
pub mod ws;

pub use app::{AppState, MonitorRuntime};
pub use error::MonitorError;
pub use store::Store;
pub use ws::Broadcaster;
