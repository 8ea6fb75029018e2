//! # Shared Data Models
//!
//! Wire-level types exchanged between Probes and Monitors. These are the
//! canonical JSON shapes; both sides serialize with serde and tolerate
//! unknown metadata fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Issue tier assigned by the classifier.
///
/// L1 issues are safe to auto-remediate, L2 issues need an approval
/// decision, L3 issues are critical or unknown and become alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueLevel {
    L1,
    L2,
    L3,
}

impl IssueLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueLevel::L1 => "L1",
            IssueLevel::L2 => "L2",
            IssueLevel::L3 => "L3",
        }
    }
}

impl std::fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue severity as proposed by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a remediation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    Success,
    Failed,
    Partial,
}

impl ActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionResult::Success => "success",
            ActionResult::Failed => "failed",
            ActionResult::Partial => "partial",
        }
    }
}

/// Overall status of one inspection, also mirrored into the agent's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Warning,
    Critical,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Warning => "warning",
            HealthState::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent health as tracked by the Monitor. `Unknown` until the first report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealth {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

impl AgentHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentHealth::Healthy => "healthy",
            AgentHealth::Warning => "warning",
            AgentHealth::Critical => "critical",
            AgentHealth::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "healthy" => AgentHealth::Healthy,
            "warning" => AgentHealth::Warning,
            "critical" => AgentHealth::Critical,
            _ => AgentHealth::Unknown,
        }
    }
}

impl From<HealthState> for AgentHealth {
    fn from(state: HealthState) -> Self {
        match state {
            HealthState::Healthy => AgentHealth::Healthy,
            HealthState::Warning => AgentHealth::Warning,
            HealthState::Critical => AgentHealth::Critical,
        }
    }
}

/// Agent liveness as tracked by the Monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPresence {
    Online,
    Offline,
}

impl AgentPresence {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPresence::Online => "online",
            AgentPresence::Offline => "offline",
        }
    }
}

/// Snapshot of host metrics collected during one inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// CPU utilization, 0..100
    pub cpu_percent: f64,
    /// Memory utilization, 0..100
    pub memory_percent: f64,
    /// Root filesystem utilization, 0..100
    pub disk_percent: f64,
    /// 1/5/15 minute load averages
    pub load_average: [f64; 3],
    /// Seconds since boot
    pub uptime_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_io: Option<HashMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_io: Option<HashMap<String, u64>>,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            load_average: [0.0, 0.0, 0.0],
            uptime_seconds: 0,
            process_count: None,
            disk_io: None,
            network_io: None,
        }
    }
}

/// One finding produced by the probe executor.
///
/// The `level` is authoritative only after the classifier has run; producers
/// fill in a provisional value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueReport {
    pub level: IssueLevel,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Evidence of one remediation attempt, shipped alongside the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub level: IssueLevel,
    pub action: String,
    pub result: ActionResult,
    pub details: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Full inspection report uploaded from a Probe to its Monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: HealthState,
    pub metrics: SystemMetrics,
    #[serde(default)]
    pub issues: Vec<IssueReport>,
    #[serde(default)]
    pub actions_taken: Vec<ActionReport>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Verdict on an L2 issue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    #[default]
    Approved,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Approved => "approved",
            DecisionStatus::Rejected => "rejected",
        }
    }
}

/// Compact L2 request forwarded to a parent Monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub agent_id: String,
    pub issue_type: String,
    pub issue_description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

/// Decision payload returned by a parent Monitor.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct UpstreamDecision {
    pub decision_id: i64,
    pub status: DecisionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_analysis: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Standard response envelope used by both HTTP APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_level_round_trips_as_bare_string() {
        let json = serde_json::to_string(&IssueLevel::L2).unwrap();
        assert_eq!(json, "\"L2\"");
        let back: IssueLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, IssueLevel::L2);
    }

    #[test]
    fn probe_report_round_trip_preserves_fields() {
        let report = ProbeReport {
            agent_id: "agent-001".to_string(),
            timestamp: Utc::now(),
            status: HealthState::Warning,
            metrics: SystemMetrics {
                cpu_percent: 42.5,
                memory_percent: 61.0,
                disk_percent: 88.2,
                load_average: [0.4, 0.3, 0.2],
                uptime_seconds: 86_400,
                process_count: Some(210),
                disk_io: None,
                network_io: None,
            },
            issues: vec![IssueReport {
                level: IssueLevel::L2,
                kind: "memory_high".to_string(),
                description: "Memory usage is 61.0%".to_string(),
                severity: Severity::High,
                proposed_fix: Some("Restart memory-intensive services".to_string()),
                risk_assessment: None,
                details: HashMap::new(),
                timestamp: Utc::now(),
            }],
            actions_taken: vec![],
            metadata: HashMap::new(),
        };

        let json = serde_json::to_string(&report).unwrap();
        let back: ProbeReport = serde_json::from_str(&json).unwrap();

        assert_eq!(back.agent_id, report.agent_id);
        assert_eq!(back.status, report.status);
        assert_eq!(back.issues.len(), 1);
        assert_eq!(back.issues[0].kind, "memory_high");
        assert_eq!(back.issues[0].severity, Severity::High);
        assert_eq!(back.metrics.process_count, Some(210));
    }

    #[test]
    fn issue_report_wire_field_is_named_type() {
        let issue = IssueReport {
            level: IssueLevel::L1,
            kind: "disk_space_low".to_string(),
            description: "Disk usage is 92%".to_string(),
            severity: Severity::High,
            proposed_fix: None,
            risk_assessment: None,
            details: HashMap::new(),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value["type"], "disk_space_low");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn unknown_metadata_fields_are_tolerated() {
        let json = serde_json::json!({
            "agent_id": "a",
            "timestamp": Utc::now(),
            "status": "healthy",
            "metrics": SystemMetrics::default(),
            "metadata": {"custom_field": {"nested": true}}
        });

        let report: ProbeReport = serde_json::from_value(json).unwrap();
        assert!(report.issues.is_empty());
        assert!(report.metadata.contains_key("custom_field"));
    }
}
