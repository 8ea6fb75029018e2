//! HTTP routers, one per resource area, merged under `/api/v1`.

pub mod alerts;
pub mod auth;
pub mod cluster;
pub mod decisions;
pub mod health;
pub mod intents;
pub mod reports;
