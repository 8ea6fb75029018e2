//! Live feed for inspection lifecycle events.
//!
//! Single-process fan-out: subscribers are added on accept and dropped on
//! their first send error, so one dead connection never affects the rest.

use chrono::Utc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::ProbeEvent;

pub struct ProbeBroadcaster {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl Default for ProbeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber; the returned receiver yields serialized events
    /// in publish order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        subscribers.push(tx);
        debug!("probe ws client connected, total: {}", subscribers.len());
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber lock poisoned").len()
    }

    /// Serialize the event (stamped with the current time) and push it to
    /// every live subscriber, dropping those whose channel is gone.
    pub fn publish(&self, event: &ProbeEvent) {
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
