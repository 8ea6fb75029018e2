//! # L3 Alert Aggregator
//!
//! Turns a batch of L3 issues from one agent into alerts, collapsing
//! repeats of the same (agent, type) inside the dedup window. Dedup is
//! advisory under concurrency; downstream consumers treat alerts as
//! idempotent.

use cortex_common::models::IssueReport;
use cortex_common::IntentRecorder;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::MonitorError;
use crate::store::{AlertRecord, NewAlert, Store};

/// Only the newest few open alerts are consulted for dedup.
const DEDUP_LOOKBACK_LIMIT: i64 = 5;

pub struct AlertAggregator {
    store: Store,
    intents: Arc<IntentRecorder>,
    dedup_window_minutes: i64,
}

impl AlertAggregator {
    pub fn new(store: Store, intents: Arc<IntentRecorder>, dedup_window_minutes: i64) -> Self {
        Self {
            store,
            intents,
            dedup_window_minutes,
        }
    }

    /// Process one agent's L3 issues; returns only the alerts actually
    /// created (duplicates are skipped).
    pub async fn process_issues(
        &self,
        issues: &[IssueReport],
        agent_id: &str,
    ) -> Result<Vec<AlertRecord>, MonitorError> {
        let mut created = Vec::new();

        for issue in issues {
            if self.is_duplicate(issue, agent_id).await? {
                info!(
                    "duplicate alert detected for {}/{}, skipping creation",
                    agent_id, issue.kind
                );
                continue;
            }

            let alert = self.create_alert(issue, agent_id).await?;
            warn!(
                "L3 alert created: [{}] {} from {}: {}",
                alert.severity,
                alert.kind,
                agent_id,
                truncate(&alert.description, 100)
            );
            created.push(alert);
        }

        Ok(created)
    }

    /// An open alert for the same (agent, type) inside the window makes the
    /// incoming issue a duplicate, regardless of description text.
    async fn is_duplicate(&self, issue: &IssueReport, agent_id: &str) -> Result<bool, MonitorError> {
        let recent = self
            .store
            .recent_open_alerts(
                agent_id,
                &issue.kind,
                self.dedup_window_minutes,
                DEDUP_LOOKBACK_LIMIT,
            )
            .await?;

        Ok(!recent.is_empty())
    }

    async fn create_alert(
        &self,
        issue: &IssueReport,
        agent_id: &str,
    ) -> Result<AlertRecord, MonitorError> {
        let mut details = serde_json::Map::new();
        details.insert("proposed_fix".to_string(), json!(issue.proposed_fix));
        details.insert("risk_assessment".to_string(), json!(issue.risk_assessment));
        for (key, value) in &issue.details {
            details.insert(key.clone(), value.clone());
        }

        let alert = self
            .store
            .insert_alert(NewAlert {
                agent_id: agent_id.to_string(),
                kind: issue.kind.clone(),
                description: issue.description.clone(),
                severity: issue.severity,
                details: Some(serde_json::Value::Object(details)),
            })
            .await?;

        self.intents
            .record_blocker(
                agent_id,
                &issue.kind,
                &format!("L3 alert created: {}", issue.description),
                Some(&json!({
                    "severity": issue.severity,
                    "proposed_fix": issue.proposed_fix,
                    "risk_assessment": issue.risk_assessment,
                    "alert_id": alert.id,
                    "details": issue.details,
                })),
            )
            .await;

        Ok(alert)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cortex_common::models::{IssueLevel, Severity};
    use std::collections::HashMap;

    fn issue(kind: &str) -> IssueReport {
        IssueReport {
            level: IssueLevel::L3,
            kind: kind.to_string(),
            description: format!("{kind} observed"),
            severity: Severity::Critical,
            proposed_fix: Some("manual intervention".to_string()),
            risk_assessment: Some("service is down".to_string()),
            details: HashMap::from([("attempts".to_string(), json!(3))]),
            timestamp: Utc::now(),
        }
    }

    async fn aggregator() -> AlertAggregator {
        AlertAggregator::new(
            Store::open_in_memory().await.unwrap(),
            Arc::new(IntentRecorder::disabled()),
            30,
        )
    }

    #[tokio::test]
    async fn first_issue_creates_an_alert_with_merged_details() {
        let aggregator = aggregator().await;

        let created = aggregator
            .process_issues(&[issue("database_connection_failed")], "agent-a")
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        let details = created[0].details.as_ref().unwrap();
        assert_eq!(details["proposed_fix"], "manual intervention");
        assert_eq!(details["risk_assessment"], "service is down");
        assert_eq!(details["attempts"], 3);
    }

    #[tokio::test]
    async fn repeat_within_window_is_deduplicated() {
        let aggregator = aggregator().await;

        let first = aggregator
            .process_issues(&[issue("database_connection_failed")], "agent-a")
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // Same (agent, type) five minutes later: no new alert
        let second = aggregator
            .process_issues(&[issue("database_connection_failed")], "agent-a")
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn different_description_same_type_is_still_a_duplicate() {
        let aggregator = aggregator().await;
        aggregator
            .process_issues(&[issue("db_down")], "agent-a")
            .await
            .unwrap();

        let mut reworded = issue("db_down");
        reworded.description = "completely different wording".to_string();
        let created = aggregator
            .process_issues(&[reworded], "agent-a")
            .await
            .unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn dedup_is_scoped_to_agent_and_type() {
        let aggregator = aggregator().await;
        aggregator
            .process_issues(&[issue("db_down")], "agent-a")
            .await
            .unwrap();

        // Same type from another agent: new alert
        let other_agent = aggregator
            .process_issues(&[issue("db_down")], "agent-b")
            .await
            .unwrap();
        assert_eq!(other_agent.len(), 1);

        // Different type from the same agent: new alert
        let other_type = aggregator
            .process_issues(&[issue("disk_failure")], "agent-a")
            .await
            .unwrap();
        assert_eq!(other_type.len(), 1);
    }

    #[tokio::test]
    async fn resolved_alert_no_longer_suppresses() {
        let aggregator = aggregator().await;
        let created = aggregator
            .process_issues(&[issue("db_down")], "agent-a")
            .await
            .unwrap();
        aggregator
            .store
            .resolve_alert(created[0].id, None)
            .await
            .unwrap();

        let after = aggregator
            .process_issues(&[issue("db_down")], "agent-a")
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn batch_mixes_new_and_duplicate() {
        let aggregator = aggregator().await;
        aggregator
            .process_issues(&[issue("db_down")], "agent-a")
            .await
            .unwrap();

        let created = aggregator
            .process_issues(&[issue("db_down"), issue("disk_failure")], "agent-a")
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, "disk_failure");
    }
}
