//! # Heartbeat Checker
//!
//! Periodic sweep transitioning expired agents to offline. Each transition
//! commits individually and broadcasts exactly one `agent_status_changed`
//! event; errors are caught per iteration so the loop survives them.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::Store;
use crate::ws::{Broadcaster, MonitorEvent};

pub struct HeartbeatChecker {
    store: Store,
    broadcaster: Arc<Broadcaster>,
    timeout_minutes: i64,
    check_interval: Duration,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatChecker {
    pub fn new(
        store: Store,
        broadcaster: Arc<Broadcaster>,
        timeout_minutes: i64,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            broadcaster,
            timeout_minutes,
            check_interval,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            warn!("heartbeat checker already running");
            return;
        }

        let checker = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            info!(
                "heartbeat checker started - timeout: {}m, interval: {}s",
                checker.timeout_minutes,
                checker.check_interval.as_secs()
            );

            loop {
                tokio::select! {
                    _ = checker.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(checker.check_interval) => {
                        if let Err(err) = checker.sweep().await {
                            error!("error checking heartbeats: {}", err);
                        }
                    }
                }
            }

            info!("heartbeat checker stopped");
        }));
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// One pass over the online set. Public so tests and administrative
    /// tooling can trigger it directly.
    pub async fn sweep(&self) -> Result<usize, crate::MonitorError> {
        let threshold = Utc::now() - ChronoDuration::minutes(self.timeout_minutes);
        let online = self.store.online_agents().await?;

        let mut transitioned = 0;
        for agent in online {
            let expired = match agent.last_heartbeat {
                None => true,
                Some(last) => last < threshold,
            };
            if !expired {
                continue;
            }

            warn!(
                "agent {} ({}) marked as offline - last heartbeat: {}",
                agent.id,
                agent.name,
                agent
                    .last_heartbeat
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );

            self.store.mark_agent_offline(&agent.id).await?;
            transitioned += 1;

            self.broadcaster.publish(&MonitorEvent::AgentStatusChanged {
                agent_id: agent.id.clone(),
                old_status: "online".to_string(),
                new_status: "offline".to_string(),
                health_status: agent.health_status.as_str().to_string(),
            });
        }

        if transitioned > 0 {
            info!("heartbeat check: {} agents marked as offline", transitioned);
        } else {
            debug!("heartbeat check: all agents are responsive");
        }

        Ok(transitioned)
    }
}
