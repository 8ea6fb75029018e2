//! # Probe Executor
//!
//! One inspection, end to end: collect metrics, derive raw issues from
//! threshold rules, classify into tiers, auto-fix the L1 tier, compute the
//! overall status, and hand the assembled report to the durable queue for
//! delivery. Milestones, L1 decisions, and L3 blockers go to the intent log
//! along the way.

use chrono::Utc;
use cortex_common::models::{
    ActionReport, ActionResult, HealthState, IssueLevel, IssueReport, ProbeReport, Severity,
    SystemMetrics,
};
use cortex_common::queue::LocalQueue;
use cortex_common::settings::{AgentMode, Settings};
use cortex_common::IntentRecorder;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::classifier::{ClassifiedIssues, IssueClassifier};
use crate::fixer::AutoFixer;
use crate::metrics::MetricsSource;
use crate::types::ProbeError;

pub struct ProbeExecutor {
    settings: Settings,
    agent_id: String,
    metrics: Arc<dyn MetricsSource>,
    classifier: IssueClassifier,
    fixer: AutoFixer,
    intents: Arc<IntentRecorder>,
    queue: Arc<LocalQueue>,
}

impl ProbeExecutor {
    pub fn new(
        settings: Settings,
        metrics: Arc<dyn MetricsSource>,
        fixer: AutoFixer,
        intents: Arc<IntentRecorder>,
        queue: Arc<LocalQueue>,
    ) -> Self {
        let agent_id = settings.agent.id.clone();
        Self {
            settings,
            agent_id,
            metrics,
            classifier: IssueClassifier::new(),
            fixer,
            intents,
            queue,
        }
    }

    /// Run the full inspection pipeline and return the assembled report.
    pub async fn execute(&self) -> Result<ProbeReport, ProbeError> {
        info!("starting probe execution for agent: {}", self.agent_id);

        self.intents
            .record_milestone(
                &self.agent_id,
                "probe_execution_start",
                &format!("Starting probe execution for {}", self.agent_id),
                None,
            )
            .await;

        let metrics = self.metrics.collect().await?;
        debug!("collected system metrics: {:?}", metrics);

        let issues = self.analyze_metrics(&metrics);
        info!("discovered {} potential issues", issues.len());

        let classified = self.classifier.classify(issues);
        info!(
            "classified issues - L1: {}, L2: {}, L3: {}",
            classified.l1.len(),
            classified.l2.len(),
            classified.l3.len()
        );

        let actions = self.fix_l1_issues(&classified.l1).await;

        for l3_issue in &classified.l3 {
            self.intents
                .record_blocker(
                    &self.agent_id,
                    &l3_issue.kind,
                    &l3_issue.description,
                    Some(&json!({
                        "severity": l3_issue.severity,
                        "proposed_fix": l3_issue.proposed_fix,
                        "risk_assessment": l3_issue.risk_assessment,
                    })),
                )
                .await;
        }

        let status = self.determine_status(&metrics, &classified);

        let mut metadata = HashMap::new();
        metadata.insert("probe_version".to_string(), json!(env!("CARGO_PKG_VERSION")));
        metadata.insert("llm_model".to_string(), json!(self.settings.llm.model));

        // L1 issues never ship as open issues; their action reports are the evidence
        let mut issues = classified.l2;
        issues.extend(classified.l3);

        let report = ProbeReport {
            agent_id: self.agent_id.clone(),
            timestamp: Utc::now(),
            status,
            metrics,
            issues,
            actions_taken: actions,
            metadata,
        };

        self.intents
            .record_milestone(
                &self.agent_id,
                "probe_execution_completed",
                &format!(
                    "Probe execution completed. Status: {}, fixes: {}, open issues: {}",
                    status,
                    report.actions_taken.len(),
                    report.issues.len()
                ),
                Some(&json!({
                    "status": status,
                    "l1_fixes_count": report.actions_taken.len(),
                    "open_issues_count": report.issues.len(),
                })),
            )
            .await;

        info!("probe execution completed. status: {}", status);
        Ok(report)
    }

    /// Threshold rules over the metrics snapshot. The severity here is a
    /// hint; the classifier owns the final tier.
    pub fn analyze_metrics(&self, metrics: &SystemMetrics) -> Vec<IssueReport> {
        let probe = &self.settings.probe;
        let mut issues = Vec::new();

        if metrics.cpu_percent > probe.threshold_cpu_percent {
            issues.push(IssueReport {
                level: IssueLevel::L2,
                kind: "cpu_high".to_string(),
                description: format!(
                    "CPU usage is {:.1}%, exceeding threshold {}%",
                    metrics.cpu_percent, probe.threshold_cpu_percent
                ),
                severity: Severity::Medium,
                proposed_fix: Some("Investigate high CPU processes".to_string()),
                risk_assessment: None,
                details: HashMap::from([(
                    "cpu_percent".to_string(),
                    json!(metrics.cpu_percent),
                )]),
                timestamp: Utc::now(),
            });
        }

        if metrics.memory_percent > probe.threshold_memory_percent {
            issues.push(IssueReport {
                level: IssueLevel::L2,
                kind: "memory_high".to_string(),
                description: format!(
                    "Memory usage is {:.1}%, exceeding threshold {}%",
                    metrics.memory_percent, probe.threshold_memory_percent
                ),
                severity: Severity::High,
                proposed_fix: Some("Restart memory-intensive services or clear cache".to_string()),
                risk_assessment: None,
                details: HashMap::from([(
                    "memory_percent".to_string(),
                    json!(metrics.memory_percent),
                )]),
                timestamp: Utc::now(),
            });
        }

        if metrics.disk_percent > probe.threshold_disk_percent {
            issues.push(IssueReport {
                level: IssueLevel::L1,
                kind: "disk_space_low".to_string(),
                description: format!(
                    "Disk usage is {:.1}%, exceeding threshold {}%",
                    metrics.disk_percent, probe.threshold_disk_percent
                ),
                severity: Severity::High,
                proposed_fix: Some("Clean up old files and logs".to_string()),
                risk_assessment: None,
                details: HashMap::from([(
                    "disk_percent".to_string(),
                    json!(metrics.disk_percent),
                )]),
                timestamp: Utc::now(),
            });
        }

        issues
    }

    async fn fix_l1_issues(&self, l1_issues: &[IssueReport]) -> Vec<ActionReport> {
        let mut actions = Vec::new();

        for issue in l1_issues {
            let Some(action) = self.fixer.fix(issue).await else {
                continue;
            };

            let status = match action.result {
                ActionResult::Success => "completed",
                ActionResult::Partial => "partial",
                ActionResult::Failed => "failed",
            };
            self.intents
                .record_decision(
                    &self.agent_id,
                    IssueLevel::L1,
                    &issue.kind,
                    &format!("Auto-fixed: {}", issue.description),
                    status,
                    Some(&json!({
                        "issue_type": issue.kind,
                        "action": action.action,
                        "result": action.result,
                        "details": action.details,
                    })),
                )
                .await;

            actions.push(action);
        }

        actions
    }

    /// Overall agent status: any L3 is critical; any L2 or threshold breach
    /// is warning; otherwise healthy.
    pub fn determine_status(
        &self,
        metrics: &SystemMetrics,
        classified: &ClassifiedIssues,
    ) -> HealthState {
        if !classified.l3.is_empty() {
            return HealthState::Critical;
        }

        let probe = &self.settings.probe;
        let threshold_breach = metrics.cpu_percent > probe.threshold_cpu_percent
            || metrics.memory_percent > probe.threshold_memory_percent
            || metrics.disk_percent > probe.threshold_disk_percent;

        if !classified.l2.is_empty() || threshold_breach {
            return HealthState::Warning;
        }

        HealthState::Healthy
    }

    /// Hand the report to the durable queue; the sender loop delivers it.
    pub async fn ship(&self, report: &ProbeReport) -> Result<i64, ProbeError> {
        let endpoint = self.report_endpoint();
        let payload = serde_json::to_value(report).map_err(cortex_common::CommonError::from)?;

        let id = self.queue.enqueue(&endpoint, &payload).await?;
        info!("report queued for delivery to {} (item {})", endpoint, id);
        Ok(id)
    }

    /// Cluster mode ships to the configured upstream; standalone ships to
    /// the local monitor.
    fn report_endpoint(&self) -> String {
        let base = match (&self.settings.agent.mode, &self.settings.agent.upstream_monitor_url) {
            (AgentMode::Cluster, Some(url)) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!(
                "http://{}:{}",
                self.settings.monitor.host, self.settings.monitor.port
            ),
        };

        format!("{base}/api/v1/reports")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::{FixHandler, FixOutcome, FixResult};
    use crate::metrics::StaticMetrics;
    use async_trait::async_trait;

    fn metrics(cpu: f64, memory: f64, disk: f64) -> SystemMetrics {
        SystemMetrics {
            cpu_percent: cpu,
            memory_percent: memory,
            disk_percent: disk,
            ..Default::default()
        }
    }

    struct AlwaysFixes;

    #[async_trait]
    impl FixHandler for AlwaysFixes {
        fn action_name(&self) -> &str {
            "cleaned_disk_space"
        }

        async fn fix(&self, _issue: &IssueReport) -> Result<FixResult, ProbeError> {
            Ok(FixResult {
                action: "cleaned_disk_space".to_string(),
                outcome: FixOutcome::Fixed("freed 2.5 GB".to_string()),
            })
        }
    }

    async fn executor_with(
        snapshot: SystemMetrics,
        fixer: AutoFixer,
    ) -> ProbeExecutor {
        let mut settings = Settings::default();
        settings.agent.id = "agent-test".to_string();
        let queue = Arc::new(LocalQueue::open_in_memory(3, 100).await.unwrap());
        let intents = Arc::new(IntentRecorder::open_in_memory().await.unwrap());

        ProbeExecutor::new(
            settings,
            Arc::new(StaticMetrics(snapshot)),
            fixer,
            intents,
            queue,
        )
    }

    #[tokio::test]
    async fn quiet_host_yields_healthy_empty_report() {
        let executor = executor_with(metrics(10.0, 20.0, 30.0), AutoFixer::empty()).await;
        let report = executor.execute().await.unwrap();

        assert_eq!(report.status, HealthState::Healthy);
        assert!(report.issues.is_empty());
        assert!(report.actions_taken.is_empty());
    }

    #[tokio::test]
    async fn disk_breach_self_heals_and_ships_clean() {
        // Disk at 92% with a 90% threshold: one L1 issue, fixed in place.
        let mut fixer = AutoFixer::empty();
        fixer.register("disk_space_low", Arc::new(AlwaysFixes));
        let executor = executor_with(metrics(10.0, 20.0, 92.0), fixer).await;

        let report = executor.execute().await.unwrap();

        // The L1 issue is represented by its action, never as an open issue
        assert!(report.issues.is_empty());
        assert_eq!(report.actions_taken.len(), 1);
        assert_eq!(report.actions_taken[0].action, "cleaned_disk_space");
        assert_eq!(report.actions_taken[0].result, ActionResult::Success);
        // The threshold breach still keeps the agent out of `healthy`
        assert_eq!(report.status, HealthState::Warning);
    }

    #[tokio::test]
    async fn cpu_and_memory_breaches_ship_as_l2_issues() {
        let executor = executor_with(metrics(95.0, 90.0, 10.0), AutoFixer::empty()).await;
        let report = executor.execute().await.unwrap();

        assert_eq!(report.status, HealthState::Warning);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|i| i.level == IssueLevel::L2));

        let kinds: Vec<&str> = report.issues.iter().map(|i| i.kind.as_str()).collect();
        assert!(kinds.contains(&"cpu_high"));
        assert!(kinds.contains(&"memory_high"));
    }

    #[tokio::test]
    async fn status_is_critical_iff_l3_present() {
        let executor = executor_with(metrics(0.0, 0.0, 0.0), AutoFixer::empty()).await;

        let critical = executor.classifier.classify(vec![IssueReport {
            level: IssueLevel::L2,
            kind: "unknown".to_string(),
            description: "something odd".to_string(),
            severity: Severity::Low,
            proposed_fix: None,
            risk_assessment: None,
            details: HashMap::new(),
            timestamp: Utc::now(),
        }]);

        assert_eq!(
            executor.determine_status(&metrics(0.0, 0.0, 0.0), &critical),
            HealthState::Critical
        );
    }

    #[tokio::test]
    async fn ship_enqueues_to_local_monitor_in_standalone_mode() {
        let executor = executor_with(metrics(1.0, 1.0, 1.0), AutoFixer::empty()).await;
        let report = executor.execute().await.unwrap();

        executor.ship(&report).await.unwrap();

        let items = executor.queue.pending(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].endpoint.ends_with("/api/v1/reports"));
        assert_eq!(items[0].payload["agent_id"], "agent-test");
    }

    #[tokio::test]
    async fn ship_prefers_upstream_in_cluster_mode() {
        let mut settings = Settings::default();
        settings.agent.id = "agent-test".to_string();
        settings.agent.mode = AgentMode::Cluster;
        settings.agent.upstream_monitor_url = Some("http://parent:8000/".to_string());

        let queue = Arc::new(LocalQueue::open_in_memory(3, 100).await.unwrap());
        let executor = ProbeExecutor::new(
            settings,
            Arc::new(StaticMetrics(metrics(1.0, 1.0, 1.0))),
            AutoFixer::empty(),
            Arc::new(IntentRecorder::disabled()),
            Arc::clone(&queue),
        );

        let report = executor.execute().await.unwrap();
        executor.ship(&report).await.unwrap();

        let items = queue.pending(10).await.unwrap();
        assert_eq!(items[0].endpoint, "http://parent:8000/api/v1/reports");
    }

    #[tokio::test]
    async fn failed_fix_still_produces_action_evidence() {
        struct NeverFixes;

        #[async_trait]
        impl FixHandler for NeverFixes {
            fn action_name(&self) -> &str {
                "cleaned_disk_space"
            }

            async fn fix(&self, _issue: &IssueReport) -> Result<FixResult, ProbeError> {
                Ok(FixResult {
                    action: "cleaned_disk_space".to_string(),
                    outcome: FixOutcome::Failed("no space could be freed".to_string()),
                })
            }
        }

        let mut fixer = AutoFixer::empty();
        fixer.register("disk_space_low", Arc::new(NeverFixes));
        let executor = executor_with(metrics(0.0, 0.0, 95.0), fixer).await;

        let report = executor.execute().await.unwrap();
        assert_eq!(report.actions_taken.len(), 1);
        assert_eq!(report.actions_taken[0].result, ActionResult::Failed);
        assert!(report.issues.is_empty());
    }
}
