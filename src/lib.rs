//! Cortex - Hierarchical Self-Healing Operations Network
//!
//! Each host runs a Probe that inspects the machine, auto-remediates the
//! safe tier, and ships the rest to a Monitor. Monitors form a parent/child
//! tree: decide locally, escalate upward, aggregate alerts, notify.
//!
//! The root crate re-exports the member crates and hosts the two daemon
//! binaries (`probe`, `monitor`).

pub use cortex_common as common;
pub use cortex_monitor as monitor;
pub use cortex_probe as probe;

pub use cortex_common::settings::Settings;

/// Crate version reported by both daemons.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
