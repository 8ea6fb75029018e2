//! # Queue Sender
//!
//! Background worker that drains the local queue in batches. Each delivery is
//! one HTTP POST wrapped in the fast retry profile; outcomes feed back into
//! the queue's state machine.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::queue::{LocalQueue, QueueItem};
use crate::retry::{retry_async, RequestError, RetryPolicy};

pub struct QueueSender {
    queue: Arc<LocalQueue>,
    client: reqwest::Client,
    send_interval: Duration,
    batch_size: i64,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueSender {
    pub fn new(queue: Arc<LocalQueue>, send_interval: Duration, batch_size: i64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            queue,
            client,
            send_interval,
            batch_size,
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sender loop. Items stranded in `sending` by a previous crash
    /// are recovered before the first batch.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            warn!("queue sender already running");
            return;
        }

        if let Err(err) = self.queue.recover_stuck_sending().await {
            error!("failed to recover stuck queue items: {}", err);
        }

        let sender = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            info!(
                "queue sender started (interval: {}s)",
                sender.send_interval.as_secs()
            );
            loop {
                tokio::select! {
                    _ = sender.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(sender.send_interval) => {
                        if let Err(err) = sender.process_batch().await {
                            error!("error in sender loop: {}", err);
                        }
                    }
                }
            }
            info!("queue sender stopped");
        }));
    }

    /// Signal the loop to exit and wait for the current iteration.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Drain everything pending right now; used at shutdown.
    pub async fn flush(&self) -> Result<usize, crate::CommonError> {
        info!("flushing queue");
        let mut processed = 0;

        loop {
            let items = self.queue.pending(self.batch_size).await?;
            if items.is_empty() {
                break;
            }
            processed += items.len();
            self.deliver_batch(items).await;
        }

        info!("flushed {} items from queue", processed);
        Ok(processed)
    }

    async fn process_batch(&self) -> Result<(), crate::CommonError> {
        let items = self.queue.pending(self.batch_size).await?;
        if items.is_empty() {
            return Ok(());
        }

        info!("processing {} queue items", items.len());
        let sent = self.deliver_batch(items).await;
        info!("batch complete: {} sent successfully", sent);
        Ok(())
    }

    /// Fire the deliveries concurrently; each outcome is recorded
    /// independently so one failure never blocks the rest of the batch.
    async fn deliver_batch(&self, items: Vec<QueueItem>) -> usize {
        let deliveries = items.into_iter().map(|item| self.send_one(item));
        join_all(deliveries)
            .await
            .into_iter()
            .filter(|sent| *sent)
            .count()
    }

    async fn send_one(&self, item: QueueItem) -> bool {
        if let Err(err) = self.queue.mark_sending(item.id).await {
            error!("failed to mark item {} as sending: {}", item.id, err);
            return false;
        }

        let policy = RetryPolicy::fast();
        let endpoint = item.endpoint.clone();
        let payload = item.payload.clone();
        let client = self.client.clone();

        let result = retry_async(&policy, || {
            let client = client.clone();
            let endpoint = endpoint.clone();
            let payload = payload.clone();
            async move {
                let response = client.post(&endpoint).json(&payload).send().await?;
                response.error_for_status().map_err(RequestError::from)
            }
        })
        .await;

        match result {
            Ok(_) => {
                if let Err(err) = self.queue.mark_sent(item.id).await {
                    error!("failed to mark item {} as sent: {}", item.id, err);
                }
                true
            }
            Err(err) => {
                error!("failed to send queue item {}: {}", item.id, err);
                if let Err(err) = self.queue.mark_failed(item.id, &err.to_string()).await {
                    error!("failed to record failure for item {}: {}", item.id, err);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueItemStatus;
    use serde_json::json;

    #[tokio::test]
    async fn flush_marks_unreachable_endpoint_failed() {
        // Unroutable address: every delivery attempt errors quickly enough
        // for the fast profile to exhaust itself.
        let queue = Arc::new(LocalQueue::open_in_memory(1, 100).await.unwrap());
        queue
            .enqueue("http://127.0.0.1:1/api/v1/reports", &json!({"agent_id": "x"}))
            .await
            .unwrap();

        let sender = Arc::new(QueueSender::new(
            Arc::clone(&queue),
            Duration::from_secs(3600),
            10,
        ));

        let processed = sender.flush().await.unwrap();
        assert_eq!(processed, 1);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let queue = Arc::new(LocalQueue::open_in_memory(3, 100).await.unwrap());
        let sender = Arc::new(QueueSender::new(
            Arc::clone(&queue),
            Duration::from_millis(50),
            10,
        ));

        sender.start().await;
        sender.start().await; // second start is a no-op
        sender.stop().await;
        sender.stop().await; // second stop is a no-op
    }

    #[tokio::test]
    async fn recovered_sending_item_is_retried_on_start() {
        let queue = Arc::new(LocalQueue::open_in_memory(3, 100).await.unwrap());
        let id = queue.enqueue("http://127.0.0.1:1/", &json!({})).await.unwrap();
        queue.mark_sending(id).await.unwrap();

        let sender = Arc::new(QueueSender::new(
            Arc::clone(&queue),
            Duration::from_secs(3600),
            10,
        ));
        sender.start().await;
        sender.stop().await;

        // Back in the pending set after recovery
        let items = queue.pending(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, QueueItemStatus::Pending);
    }
}
