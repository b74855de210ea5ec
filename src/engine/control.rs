//! Control plane loop: read pgmq, run the worker, archive.
//!
//! Concurrency is bounded by a semaphore sized to the provider's tolerance
//! (one in-flight call by default). A message is archived once the worker
//! returns an outcome; retries travel as new delayed messages. An interrupted
//! delivery enqueues nothing, so the original message is held with
//! `pgmq.set_vt` for the worker's delay and becomes the single redelivery. A
//! process that dies mid-delivery is covered by the read's visibility timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tracing::{Instrument, debug, error, info, warn};

use crate::db::Db;
use crate::db::pgmq::PgmqMessage;
use crate::error::{Error, Result};
use crate::queue::WORK_QUEUE;
use crate::worker::{WorkOutcome, Worker};

/// Configuration for the control plane.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Visibility timeout (seconds) for pgmq reads.
    pub visibility_timeout: i32,
    /// Idle wait when the queue is empty.
    pub poll_interval: Duration,
    /// Maximum concurrent worker deliveries.
    pub concurrency: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 60,
            poll_interval: Duration::from_secs(1),
            concurrency: 1,
        }
    }
}

/// The control plane loop: read work, run the worker, retire messages.
#[derive(Clone)]
pub struct ControlPlane {
    db: Arc<Db>,
    worker: Worker,
    config: ControlConfig,
    shutdown: Arc<Notify>,
    permits: Arc<Semaphore>,
}

impl ControlPlane {
    pub fn new(db: Arc<Db>, worker: Worker, config: ControlConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            db,
            worker,
            config,
            shutdown: Arc::new(Notify::new()),
            permits,
        }
    }

    /// Signal the control plane to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until shutdown, then wait for in-flight deliveries.
    pub async fn run(&self) -> Result<()> {
        info!(
            queue = WORK_QUEUE,
            concurrency = self.config.concurrency,
            "control plane started"
        );

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.notified() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => permit
                    .map_err(|e| Error::Other(format!("worker semaphore closed: {e}")))?,
            };

            let msg = match self
                .db
                .read_from_queue(WORK_QUEUE, self.config.visibility_timeout)
                .await
            {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("queue read failed: {e}");
                    None
                }
            };

            let Some(msg) = msg else {
                drop(permit);
                let stop = tokio::select! {
                    _ = self.shutdown.notified() => true,
                    _ = tokio::time::sleep(self.config.poll_interval) => false,
                };
                if stop {
                    break;
                }
                continue;
            };

            let this = self.clone();
            tokio::spawn(async move {
                this.deliver(msg).await;
                drop(permit);
            });
        }

        info!("control plane shutting down, draining in-flight work");
        let in_flight = u32::try_from(self.config.concurrency.max(1)).unwrap_or(u32::MAX);
        let _ = self.permits.acquire_many(in_flight).await;
        Ok(())
    }

    async fn deliver(&self, msg: PgmqMessage) {
        let span = tracing::info_span!(
            "queue.deliver",
            msg_id = msg.msg_id,
            read_ct = msg.read_ct,
            wait_ms = u64::try_from(msg.queue_wait().as_millis()).unwrap_or(u64::MAX),
        );
        async {
            let disposition = match msg.work() {
                Ok(work) => {
                    let outcome = self.worker.handle(work).await;
                    log_outcome(&outcome);
                    Disposition::for_outcome(&outcome)
                }
                Err(e) => {
                    error!("discarding undecodable work item: {e}");
                    Disposition::Archive
                }
            };

            match disposition {
                Disposition::Archive => {
                    if let Err(e) = self.db.archive_message(WORK_QUEUE, msg.msg_id).await {
                        // Left visible again after the timeout; the worker's
                        // status checks make the redelivery harmless.
                        warn!("archive failed: {e}");
                    }
                }
                Disposition::Hold(delay) => {
                    if let Err(e) = self.db.set_visibility(WORK_QUEUE, msg.msg_id, delay).await {
                        warn!(?delay, "visibility extension failed, read timeout applies: {e}");
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// What happens to a read message once the worker is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Acknowledge; any retry already travels as its own message.
    Archive,
    /// Keep this message as the only redelivery, hidden for the duration.
    Hold(Duration),
}

impl Disposition {
    fn for_outcome(outcome: &WorkOutcome) -> Self {
        match outcome {
            WorkOutcome::Interrupted { retry_after } => Disposition::Hold(*retry_after),
            _ => Disposition::Archive,
        }
    }
}

fn log_outcome(outcome: &WorkOutcome) {
    match outcome {
        WorkOutcome::Completed { .. } | WorkOutcome::Rescheduled { .. } => {
            debug!(?outcome, "delivery finished")
        }
        WorkOutcome::Exhausted { attempts } => warn!(attempts, "request failed permanently"),
        WorkOutcome::Interrupted { retry_after } => {
            warn!(?retry_after, "delivery interrupted, holding message")
        }
        other => debug!(outcome = ?other, "delivery skipped"),
    }
}
