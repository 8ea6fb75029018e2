//! # Live Event Broadcaster
//!
//! Single-process fan-out of monitor events to WebSocket subscribers.
//! Subscribers are registered on accept and dropped on their first send
//! error; ordering is per-subscriber FIFO with no cross-subscriber promise.

use chrono::Utc;
use cortex_common::models::DecisionStatus;
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    ReportReceived {
        agent_id: String,
        report_id: i64,
        summary: serde_json::Value,
    },
    AlertTriggered {
        alert_id: i64,
        agent_id: String,
        level: String,
        alert_type: String,
        description: String,
    },
    DecisionMade {
        decision_id: i64,
        agent_id: String,
        status: DecisionStatus,
        reason: String,
    },
    AgentStatusChanged {
        agent_id: String,
        old_status: String,
        new_status: String,
        health_status: String,
    },
}

pub struct Broadcaster {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.push(tx);
        debug!("ws client connected, total: {}", subscribers.len());
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock poisoned").len()
    }

    pub fn publish(&self, event: &MonitorEvent) {
        let mut message = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(_) => return,
        };
        if let Some(map) = message.as_object_mut() {
            map.insert("timestamp".to_string(), serde_json::json!(Utc::now()));
        }
        let payload = message.to_string();

        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agent_status_change_reaches_subscribers() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.publish(&MonitorEvent::AgentStatusChanged {
            agent_id: "a".to_string(),
            old_status: "online".to_string(),
            new_status: "offline".to_string(),
            health_status: "warning".to_string(),
        });

        let event: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "agent_status_changed");
        assert_eq!(event["old_status"], "online");
        assert_eq!(event["new_status"], "offline");
        assert!(event["timestamp"].is_string());
    }

    #[tokio::test]
    async fn send_error_on_one_subscriber_spares_the_rest() {
        let broadcaster = Broadcaster::new();
        let rx_dropped = broadcaster.subscribe();
        let mut rx_live = broadcaster.subscribe();

        drop(rx_dropped);
        broadcaster.publish(&MonitorEvent::ReportReceived {
            agent_id: "a".to_string(),
            report_id: 1,
            summary: serde_json::json!({"status": "healthy"}),
        });

        assert_eq!(broadcaster.subscriber_count(), 1);
        let event: serde_json::Value =
            serde_json::from_str(&rx_live.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "report_received");
    }
}
