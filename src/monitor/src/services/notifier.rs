//! # Notifier Dispatcher
//!
//! Best-effort push of alerts to the external bot channel. Disabled is a
//! first-class state in which every send succeeds as a no-op. Failures are
//! logged and never propagate; the Monitor's correctness does not depend on
//! this component.

use cortex_common::retry::{retry_async, RequestError, RetryPolicy};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::store::{AlertRecord, AlertSummary};

/// Pause between messages in a batch, to stay inside the bot API limits.
const BATCH_SEND_PACING: Duration = Duration::from_millis(500);

pub struct Notifier {
    enabled: bool,
    api_base_url: Option<String>,
    chat_id: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(enabled: bool, bot_token: Option<&str>, chat_id: Option<&str>) -> Self {
        let mut enabled = enabled;
        if enabled && (bot_token.is_none() || chat_id.is_none()) {
            error!("notifier bot_token or chat_id not configured, disabling");
            enabled = false;
        }
        if !enabled {
            warn!("notifier is disabled, sends succeed as no-ops");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            enabled,
            api_base_url: bot_token.map(|token| format!("https://api.telegram.org/bot{token}")),
            chat_id: chat_id.map(String::from),
            client,
        }
    }

    /// Override the API base, for tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base_url = Some(base_url.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Push one message. Disabled mode returns success without sending.
    pub async fn send_message(&self, message: &str) -> bool {
        if !self.enabled {
            debug!("notifier disabled, skipping message send");
            return true;
        }
        let (Some(base_url), Some(chat_id)) = (&self.api_base_url, &self.chat_id) else {
            return true;
        };

        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": message,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        let policy = RetryPolicy::fast();
        let result = retry_async(&policy, || {
            let client = self.client.clone();
            let url = format!("{base_url}/sendMessage");
            let body = body.clone();
            async move {
                let response = client.post(&url).json(&body).send().await?;
                response.error_for_status().map_err(RequestError::from)
            }
        })
        .await;

        match result {
            Ok(_) => {
                info!("notifier message sent");
                true
            }
            Err(err) => {
                error!("error sending notifier message after retries: {}", err);
                false
            }
        }
    }

    pub async fn send_alert(&self, alert: &AlertRecord) -> bool {
        self.send_message(&format_alert(alert)).await
    }

    /// Paced sequential sends; returns how many went through.
    pub async fn send_batch_alerts(&self, alerts: &[AlertRecord]) -> usize {
        if alerts.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for (i, alert) in alerts.iter().enumerate() {
            if self.send_alert(alert).await {
                sent += 1;
            }
            if i + 1 < alerts.len() {
                tokio::time::sleep(BATCH_SEND_PACING).await;
            }
        }

        info!("sent {}/{} notifier messages", sent, alerts.len());
        sent
    }

    pub async fn send_summary(&self, summary: &AlertSummary) -> bool {
        self.send_message(&format_summary(summary)).await
    }
}

fn severity_emoji(severity: &str) -> &'static str {
    match severity {
        "critical" => "🔴",
        "high" => "🟠",
        "medium" => "🟡",
        "low" => "🟢",
        _ => "⚠️",
    }
}

/// Short human-readable rendering of one alert.
pub fn format_alert(alert: &AlertRecord) -> String {
    format!(
        "{emoji} *L3 Alert*\n\n\
         *Severity*: {severity}\n\
         *Agent*: `{agent}`\n\
         *Type*: {kind}\n\
         *Time*: {time}\n\n\
         *Description*:\n{description}\n\n\
         _Alert ID: {id}_",
        emoji = severity_emoji(alert.severity.as_str()),
        severity = alert.severity.as_str().to_uppercase(),
        agent = alert.agent_id,
        kind = alert.kind,
        time = alert.created_at.format("%Y-%m-%d %H:%M:%S"),
        description = alert.description,
        id = alert.id,
    )
}

pub fn format_summary(summary: &AlertSummary) -> String {
    let mut message = format!(
        "📊 *Alert Summary* (last {hours} hours)\n\n\
         *Total*: {total} alerts\n\n\
         *By severity*:\n\
         - 🔴 Critical: {critical}\n\
         - 🟠 High: {high}\n\
         - 🟡 Medium: {medium}\n\
         - 🟢 Low: {low}\n\n\
         *By status*:\n\
         - New: {new}\n\
         - Acknowledged: {acknowledged}\n\
         - Resolved: {resolved}\n\n\
         *Noisiest agents*:\n",
        hours = summary.time_range_hours,
        total = summary.total_alerts,
        critical = summary.by_severity.get("critical").unwrap_or(&0),
        high = summary.by_severity.get("high").unwrap_or(&0),
        medium = summary.by_severity.get("medium").unwrap_or(&0),
        low = summary.by_severity.get("low").unwrap_or(&0),
        new = summary.by_status.get("new").unwrap_or(&0),
        acknowledged = summary.by_status.get("acknowledged").unwrap_or(&0),
        resolved = summary.by_status.get("resolved").unwrap_or(&0),
    );

    for (agent_id, count) in &summary.top_agents {
        message.push_str(&format!("- {agent_id}: {count}\n"));
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewAlert, Store};
    use cortex_common::models::Severity;

    async fn sample_alert() -> AlertRecord {
        let store = Store::open_in_memory().await.unwrap();
        store
            .insert_alert(NewAlert {
                agent_id: "agent-a".to_string(),
                kind: "database_connection_failed".to_string(),
                description: "cannot reach primary".to_string(),
                severity: Severity::Critical,
                details: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn disabled_notifier_succeeds_as_no_op() {
        let notifier = Notifier::new(false, None, None);
        assert!(!notifier.is_enabled());
        assert!(notifier.send_message("hello").await);

        let alert = sample_alert().await;
        assert_eq!(notifier.send_batch_alerts(&[alert]).await, 1);
    }

    #[test]
    fn enabled_without_credentials_degrades_to_disabled() {
        let notifier = Notifier::new(true, None, Some("123"));
        assert!(!notifier.is_enabled());
    }

    #[tokio::test]
    async fn unreachable_api_fails_without_propagating() {
        let notifier = Notifier::new(true, Some("token"), Some("123"))
            .with_base_url("http://127.0.0.1:1");

        // Returns false; never panics or errors out
        assert!(!notifier.send_message("alert!").await);
    }

    #[tokio::test]
    async fn alert_formatting_carries_the_essentials() {
        let alert = sample_alert().await;
        let message = format_alert(&alert);

        assert!(message.contains("🔴"));
        assert!(message.contains("CRITICAL"));
        assert!(message.contains("agent-a"));
        assert!(message.contains("database_connection_failed"));
        assert!(message.contains("cannot reach primary"));
        assert!(message.contains(&format!("Alert ID: {}", alert.id)));
    }

    #[tokio::test]
    async fn summary_formatting_lists_noisy_agents() {
        let store = Store::open_in_memory().await.unwrap();
        for _ in 0..2 {
            store
                .insert_alert(NewAlert {
                    agent_id: "loud".to_string(),
                    kind: "x".to_string(),
                    description: "d".to_string(),
                    severity: Severity::High,
                    details: None,
                })
                .await
                .unwrap();
        }

        let summary = store.alert_summary(24).await.unwrap();
        let message = format_summary(&summary);
        assert!(message.contains("Total*: 2"));
        assert!(message.contains("loud: 2"));
    }
}
