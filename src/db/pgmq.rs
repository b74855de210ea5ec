//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.set_vt, pgmq.archive. Delayed redelivery uses pgmq.send's delay
//! argument.

use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::{RequestId, WorkMessage};
use crate::queue::WorkQueue;
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

impl PgmqMessage {
    /// Time the message spent in the queue before this read.
    pub fn queue_wait(&self) -> Duration {
        (chrono::Utc::now() - self.enqueued_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Decode the body as a [`WorkMessage`].
    pub fn work(&self) -> Result<WorkMessage> {
        serde_json::from_value(self.message.clone())
            .map_err(|e| Error::Other(format!("bad pgmq payload in msg {}: {e}", self.msg_id)))
    }
}

fn record_op(queue: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(self.pool())
            .await?;
        record_op(queue_name, "create");
        Ok(())
    }

    /// Send a message, visible after `delay` (whole seconds, rounded up).
    /// Returns the message ID.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay: Duration,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds(delay))
            .fetch_one(self.pool())
            .await?;
        record_op(queue_name, if delay.is_zero() { "send" } else { "send_delayed" });
        Ok(row.0)
    }

    /// Read the next visible message, hiding it for `vt_seconds`.
    /// Returns None if the queue is empty.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)")
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(self.pool())
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            message,
        });
        record_op(queue_name, if msg.is_some() { "read" } else { "read_empty" });
        Ok(msg)
    }

    /// Keep a read message hidden for `delay` from now, after which it is
    /// redelivered as is.
    pub async fn set_visibility(
        &self,
        queue_name: &str,
        msg_id: i64,
        delay: Duration,
    ) -> Result<()> {
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(delay_seconds(delay))
            .fetch_optional(self.pool())
            .await?;
        record_op(queue_name, "set_vt");
        Ok(())
    }

    /// Archive a message (acknowledge it, keeping a copy for audit).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        record_op(queue_name, "archive");
        Ok(())
    }
}

/// pgmq takes integer seconds. Round up so a provider hint of 30.2s is never
/// delivered early.
fn delay_seconds(delay: Duration) -> i32 {
    let secs = delay
        .as_secs()
        .saturating_add(u64::from(delay.subsec_nanos() > 0));
    i32::try_from(secs).unwrap_or(i32::MAX)
}

#[async_trait]
impl WorkQueue for super::Db {
    async fn schedule(&self, request_id: RequestId, delay: Duration) -> Result<()> {
        let payload = serde_json::to_value(WorkMessage { request_id })?;
        self.send_to_queue(crate::queue::WORK_QUEUE, &payload, delay)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_rounds_up_to_whole_seconds() {
        assert_eq!(delay_seconds(Duration::ZERO), 0);
        assert_eq!(delay_seconds(Duration::from_secs(30)), 30);
        assert_eq!(delay_seconds(Duration::from_millis(30_200)), 31);
    }

    #[test]
    fn queue_wait_measures_from_enqueue() {
        let msg = PgmqMessage {
            msg_id: 1,
            read_ct: 1,
            enqueued_at: chrono::Utc::now() - chrono::Duration::seconds(5),
            message: serde_json::json!({}),
        };
        assert!(msg.queue_wait() >= Duration::from_secs(5));

        let future = PgmqMessage {
            enqueued_at: chrono::Utc::now() + chrono::Duration::seconds(5),
            ..msg
        };
        assert_eq!(future.queue_wait(), Duration::ZERO);
    }

    #[test]
    fn delay_saturates() {
        assert_eq!(delay_seconds(Duration::from_secs(u64::MAX)), i32::MAX);
    }
}
