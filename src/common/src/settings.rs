//! # Configuration
//!
//! Layered configuration for both daemons. Precedence: environment variables
//! (`CORTEX_` prefix, `__` separator) over the YAML file named by
//! `CORTEX_CONFIG` (default `config.yaml`) over built-in defaults.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub agent: AgentSettings,
    pub probe: ProbeSettings,
    pub monitor: MonitorSettings,
    pub llm: LlmSettings,
    pub notifier: NotifierSettings,
    pub intent_engine: IntentEngineSettings,
    pub logging: LoggingSettings,
    pub auth: AuthSettings,
}

impl Settings {
    /// Load from `$CORTEX_CONFIG` (or `config.yaml`) with environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CORTEX_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(Some(PathBuf::from(path)))
    }

    pub fn load_from_path<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.as_ref())
                    .format(FileFormat::Yaml)
                    .required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("CORTEX").separator("__"));

        let config = builder.build().context("failed to assemble configuration")?;
        config
            .try_deserialize()
            .context("invalid cortex configuration")
    }

    /// Copy of the configuration safe to expose over HTTP: secrets masked.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();

        for pointer in [
            "/llm/api_key",
            "/notifier/bot_token",
            "/monitor/registration_token",
            "/auth/secret_key",
        ] {
            if let Some(slot) = value.pointer_mut(pointer) {
                if !slot.is_null() {
                    *slot = serde_json::Value::String("***".to_string());
                }
            }
        }

        value
    }
}

/// Identity of this node and its position in the cluster tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub id: String,
    pub name: String,
    pub mode: AgentMode,
    pub upstream_monitor_url: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            id: "cortex-agent".to_string(),
            name: "Cortex Agent".to_string(),
            mode: AgentMode::Standalone,
            upstream_monitor_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Standalone,
    Cluster,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Probe HTTP listen address
    pub host: String,
    pub port: u16,
    /// Cron expression driving scheduled inspections (default hourly)
    pub schedule: String,
    /// Hard cap for one inspection run
    pub timeout_seconds: u64,
    pub workspace: Option<String>,
    pub report_retention_days: u32,
    pub check_system_health: bool,
    pub check_service_status: bool,
    pub check_log_analysis: bool,
    pub check_network: bool,
    pub threshold_cpu_percent: f64,
    pub threshold_memory_percent: f64,
    pub threshold_disk_percent: f64,
    /// Local queue file absorbing report uploads
    pub queue_path: String,
    pub queue_capacity: i64,
    pub queue_max_retries: u32,
    pub queue_send_interval_seconds: u64,
    pub queue_batch_size: i64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            schedule: "0 * * * *".to_string(),
            timeout_seconds: 300,
            workspace: None,
            report_retention_days: 30,
            check_system_health: true,
            check_service_status: true,
            check_log_analysis: true,
            check_network: true,
            threshold_cpu_percent: 80.0,
            threshold_memory_percent: 85.0,
            threshold_disk_percent: 90.0,
            queue_path: "cortex_queue.db".to_string(),
            queue_capacity: 1000,
            queue_max_retries: 5,
            queue_send_interval_seconds: 60,
            queue_batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Shared secret required for agent registration
    pub registration_token: String,
    pub heartbeat_timeout_minutes: i64,
    pub heartbeat_check_interval_seconds: u64,
    pub alert_dedup_window_minutes: i64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_url: "sqlite://cortex.db".to_string(),
            registration_token: String::new(),
            heartbeat_timeout_minutes: 5,
            heartbeat_check_interval_seconds: 60,
            alert_dedup_window_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: u64,
    pub temperature: f64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4".to_string(),
            max_tokens: 2000,
            timeout: 30,
            temperature: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifierSettings {
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentEngineSettings {
    pub enabled: bool,
    pub database_url: String,
}

impl Default for IntentEngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: "sqlite://cortex_intents.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    pub console: bool,
    pub file: Option<String>,
    pub rotation: String,
    pub retention: String,
    pub compression: String,
    /// Per-module level overrides, e.g. `cortex_monitor -> debug`
    pub modules: HashMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Standard,
            console: true,
            file: None,
            rotation: "daily".to_string(),
            retention: "30 days".to_string(),
            compression: "zip".to_string(),
            modules: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Standard,
    Json,
    Simple,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub secret_key: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret_key: "change-me-in-production".to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let settings = Settings::default();
        assert_eq!(settings.agent.mode, AgentMode::Standalone);
        assert_eq!(settings.probe.schedule, "0 * * * *");
        assert_eq!(settings.monitor.heartbeat_timeout_minutes, 5);
        assert_eq!(settings.probe.threshold_disk_percent, 90.0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from_path(Some("/nonexistent/cortex.yaml")).unwrap();
        assert_eq!(settings.monitor.port, 8000);
    }

    #[test]
    fn redacted_masks_secrets() {
        let mut settings = Settings::default();
        settings.llm.api_key = Some("sk-secret".to_string());
        settings.notifier.bot_token = Some("123:token".to_string());
        settings.monitor.registration_token = "shared".to_string();

        let value = settings.redacted();
        assert_eq!(value["llm"]["api_key"], "***");
        assert_eq!(value["notifier"]["bot_token"], "***");
        assert_eq!(value["monitor"]["registration_token"], "***");
        assert_eq!(value["auth"]["secret_key"], "***");
        // Non-secret fields survive untouched
        assert_eq!(value["monitor"]["port"], 8000);
    }
}
