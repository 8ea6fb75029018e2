//! # Durable Local Queue
//!
//! Bounded FIFO of pending outbound messages, persisted in a single SQLite
//! file so deliveries survive process restarts. Items move through
//! `pending -> sending -> sent` with `failed` as the terminal state once the
//! per-item retry cap is reached.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

use crate::CommonError;

/// Headroom over capacity before pruning kicks in, so that a full queue does
/// not pay a delete on every insert.
const PRUNE_SLACK: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItemStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Sending => "sending",
            QueueItemStatus::Sent => "sent",
            QueueItemStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "sending" => QueueItemStatus::Sending,
            "sent" => QueueItemStatus::Sent,
            "failed" => QueueItemStatus::Failed,
            _ => QueueItemStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub sending: i64,
    pub sent: i64,
    pub failed: i64,
    pub total: i64,
}

/// SQLite-backed delivery queue.
pub struct LocalQueue {
    pool: SqlitePool,
    max_retry_count: u32,
    capacity: i64,
}

impl LocalQueue {
    /// Open (and create if missing) the queue file and its schema.
    pub async fn open(
        path: impl AsRef<Path>,
        max_retry_count: u32,
        capacity: i64,
    ) -> Result<Self, CommonError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let queue = Self {
            pool,
            max_retry_count,
            capacity,
        };
        queue.init_schema().await?;
        Ok(queue)
    }

    /// In-memory queue for tests.
    pub async fn open_in_memory(max_retry_count: u32, capacity: i64) -> Result<Self, CommonError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single long-lived connection: each new in-memory connection would
        // otherwise see a fresh, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let queue = Self {
            pool,
            max_retry_count,
            capacity,
        };
        queue.init_schema().await?;
        Ok(queue)
    }

    async fn init_schema(&self) -> Result<(), CommonError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                endpoint TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_status_created ON queue_items(status, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a payload for later delivery. Prunes oldest terminal items
    /// first when the queue is at capacity.
    pub async fn enqueue(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<i64, CommonError> {
        self.prune_if_full().await?;

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO queue_items (endpoint, payload, status, retry_count, created_at, updated_at)
             VALUES (?, ?, 'pending', 0, ?, ?)",
        )
        .bind(endpoint)
        .bind(payload.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!("enqueued item {} for {}", id, endpoint);
        Ok(id)
    }

    /// Oldest pending items still below the retry cap.
    pub async fn pending(&self, limit: i64) -> Result<Vec<QueueItem>, CommonError> {
        let rows = sqlx::query(
            "SELECT id, endpoint, payload, status, retry_count, created_at, updated_at, last_error
             FROM queue_items
             WHERE status = 'pending' AND retry_count < ?
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
        )
        .bind(self.max_retry_count as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    pub async fn mark_sending(&self, id: i64) -> Result<(), CommonError> {
        sqlx::query("UPDATE queue_items SET status = 'sending', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_sent(&self, id: i64) -> Result<(), CommonError> {
        sqlx::query("UPDATE queue_items SET status = 'sent', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        debug!("item {} marked as sent", id);
        Ok(())
    }

    /// Record a delivery failure: bump the retry counter and either park the
    /// item back in `pending` or, once the cap is reached, park it in the
    /// terminal `failed` state.
    pub async fn mark_failed(&self, id: i64, last_error: &str) -> Result<(), CommonError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE queue_items
             SET retry_count = retry_count + 1, last_error = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(last_error)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let retry_count: i64 = sqlx::query("SELECT retry_count FROM queue_items WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?
            .get("retry_count");

        if retry_count >= self.max_retry_count as i64 {
            sqlx::query("UPDATE queue_items SET status = 'failed' WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            error!(
                "item {} marked as failed after {} retries",
                id, self.max_retry_count
            );
        } else {
            sqlx::query("UPDATE queue_items SET status = 'pending' WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            warn!(
                "item {} retry count: {}/{}",
                id, retry_count, self.max_retry_count
            );
        }

        tx.commit().await?;
        Ok(())
    }

    /// Return items stuck in `sending` (a crash mid-delivery) to `pending`.
    /// Duplicate deliveries this may cause are tolerated by idempotent ingest.
    pub async fn recover_stuck_sending(&self) -> Result<u64, CommonError> {
        let result =
            sqlx::query("UPDATE queue_items SET status = 'pending', updated_at = ? WHERE status = 'sending'")
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!("recovered {} items stuck in sending state", recovered);
        }
        Ok(recovered)
    }

    /// Delete terminal items older than the cutoff.
    pub async fn cleanup_older_than(&self, days: i64) -> Result<u64, CommonError> {
        let cutoff = Utc::now() - ChronoDuration::days(days);

        let result = sqlx::query(
            "DELETE FROM queue_items WHERE status IN ('sent', 'failed') AND created_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("cleaned up {} old queue items (>{} days)", deleted, days);
        }
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<QueueStats, CommonError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM queue_items GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match QueueItemStatus::parse(&status) {
                QueueItemStatus::Pending => stats.pending = count,
                QueueItemStatus::Sending => stats.sending = count,
                QueueItemStatus::Sent => stats.sent = count,
                QueueItemStatus::Failed => stats.failed = count,
            }
        }
        stats.total = stats.pending + stats.sending + stats.sent + stats.failed;
        Ok(stats)
    }

    async fn prune_if_full(&self) -> Result<(), CommonError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM queue_items")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        if total < self.capacity {
            return Ok(());
        }

        // Delete a batch larger than strictly necessary so the next inserts
        // do not immediately re-trigger pruning.
        let to_delete = total - self.capacity + PRUNE_SLACK;

        let result = sqlx::query(
            "DELETE FROM queue_items WHERE id IN (
                 SELECT id FROM queue_items
                 WHERE status IN ('sent', 'failed')
                 ORDER BY created_at ASC
                 LIMIT ?
             )",
        )
        .bind(to_delete)
        .execute(&self.pool)
        .await?;

        info!("pruned {} old queue items", result.rows_affected());
        Ok(())
    }

    fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<QueueItem, CommonError> {
        let payload_text: String = row.get("payload");
        let status: String = row.get("status");
        let retry_count: i64 = row.get("retry_count");

        Ok(QueueItem {
            id: row.get("id"),
            endpoint: row.get("endpoint"),
            payload: serde_json::from_str(&payload_text)?,
            status: QueueItemStatus::parse(&status),
            retry_count: retry_count as u32,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            last_error: row.get("last_error"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn queue() -> LocalQueue {
        LocalQueue::open_in_memory(3, 50).await.unwrap()
    }

    #[tokio::test]
    async fn enqueue_and_fetch_pending() {
        let queue = queue().await;

        let id = queue
            .enqueue("http://monitor/api/v1/reports", &json!({"agent_id": "a"}))
            .await
            .unwrap();
        assert!(id > 0);

        let items = queue.pending(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].status, QueueItemStatus::Pending);
        assert_eq!(items[0].payload["agent_id"], "a");
    }

    #[tokio::test]
    async fn pending_is_fifo() {
        let queue = queue().await;
        for n in 0..3 {
            queue
                .enqueue("http://monitor/reports", &json!({ "n": n }))
                .await
                .unwrap();
        }

        let items = queue.pending(10).await.unwrap();
        let order: Vec<i64> = items.iter().map(|i| i.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_item_returns_to_pending_until_cap() {
        let queue = queue().await;
        let id = queue.enqueue("http://x", &json!({})).await.unwrap();

        queue.mark_sending(id).await.unwrap();
        queue.mark_failed(id, "connection refused").await.unwrap();

        let items = queue.pending(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].retry_count, 1);
        assert_eq!(items[0].last_error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn item_becomes_terminal_failed_at_retry_cap() {
        let queue = queue().await;
        let id = queue.enqueue("http://x", &json!({})).await.unwrap();

        for _ in 0..3 {
            queue.mark_sending(id).await.unwrap();
            queue.mark_failed(id, "timeout").await.unwrap();
        }

        assert!(queue.pending(10).await.unwrap().is_empty());
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn sent_items_leave_the_pending_set() {
        let queue = queue().await;
        let id = queue.enqueue("http://x", &json!({})).await.unwrap();

        queue.mark_sending(id).await.unwrap();
        queue.mark_sent(id).await.unwrap();

        assert!(queue.pending(10).await.unwrap().is_empty());
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn recover_returns_sending_items_to_pending() {
        let queue = queue().await;
        let id = queue.enqueue("http://x", &json!({})).await.unwrap();
        queue.mark_sending(id).await.unwrap();

        assert!(queue.pending(10).await.unwrap().is_empty());

        let recovered = queue.recover_stuck_sending().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(queue.pending(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capacity_pruning_drops_oldest_terminal_items() {
        let queue = LocalQueue::open_in_memory(3, 10).await.unwrap();

        // Fill with terminal items
        for n in 0..10 {
            let id = queue.enqueue("http://x", &json!({ "n": n })).await.unwrap();
            queue.mark_sent(id).await.unwrap();
        }

        // This enqueue crosses capacity and must prune terminal rows
        queue.enqueue("http://x", &json!({"fresh": true})).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert!(stats.total <= 10 + PRUNE_SLACK);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn cleanup_ignores_recent_and_pending_items() {
        let queue = queue().await;
        let sent = queue.enqueue("http://x", &json!({})).await.unwrap();
        queue.mark_sent(sent).await.unwrap();
        queue.enqueue("http://x", &json!({})).await.unwrap();

        let deleted = queue.cleanup_older_than(7).await.unwrap();
        assert_eq!(deleted, 0);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = LocalQueue::open(&path, 3, 50).await.unwrap();
            queue.enqueue("http://x", &json!({"persisted": true})).await.unwrap();
        }

        let queue = LocalQueue::open(&path, 3, 50).await.unwrap();
        let items = queue.pending(10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload["persisted"], true);
    }
}
