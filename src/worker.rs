//! Worker: drives one request from `Queued` to `Done` or `Failed`.
//!
//! Each delivery runs the same steps:
//!
//! 1. Load the record. Missing or terminal records are acknowledged untouched;
//!    this is what makes redelivery of a finished work item harmless.
//! 2. Claim: bump `attempts` and move to `Processing`, or to `Failed` once the
//!    ceiling is passed. The ceiling check happens before any provider call.
//! 3. Call the provider. Throttling or failure schedules an explicit delayed
//!    redelivery and then reverts to `Queued`; success stores the link, moves
//!    to `Done` and writes the link index.
//! 4. Fire "invite_created" once, flag-gated.
//!
//! [`Worker::handle`] never fails. A store or queue error that stops a
//! delivery short is reported as [`WorkOutcome::Interrupted`] with the delay
//! the caller should hold the original message for; the worker itself never
//! enqueues a second copy in that case.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{Instrument, error, info, warn};

use crate::backoff::RetryPolicy;
use crate::digest::link_digest;
use crate::error::Result;
use crate::model::{InviteRequest, LinkEntry, RequestId, RequestStatus, WorkMessage};
use crate::notify::{Milestone, NotificationGateway};
use crate::provider::{ArtifactProvider, InviteSpec, ProviderError};
use crate::queue::WorkQueue;
use crate::store::{LinkIndex, RequestStore};
use crate::telemetry::metrics;
use crate::telemetry::request::{record_state_transition, start_delivery_span};

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerConfig {
    pub retry: RetryPolicy,
    /// Lifetime of generated invites. `None` = no expiry.
    pub invite_ttl: Option<Duration>,
}

/// What a single delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// No record with that id.
    Missing,
    /// Already `Done`; nothing called, nothing written.
    AlreadyDone,
    /// Already `Failed`; nothing called, nothing written.
    AlreadyFailed,
    /// Another delivery moved the record to a terminal state first.
    Superseded,
    /// Attempt ceiling passed on this delivery; now `Failed`.
    Exhausted { attempts: u32 },
    /// Invite generated; now `Done`.
    Completed { created_notified: bool },
    /// Redelivery scheduled after `delay`; the record is back to `Queued`
    /// unless that write failed, in which case the redelivery re-claims it.
    Rescheduled { delay: Duration, rate_limited: bool },
    /// A store or queue error interrupted the delivery. Nothing was scheduled;
    /// the original message should become visible again after `retry_after`.
    Interrupted { retry_after: Duration },
}

#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn RequestStore>,
    links: Arc<dyn LinkIndex>,
    queue: Arc<dyn WorkQueue>,
    provider: Arc<dyn ArtifactProvider>,
    notifier: Arc<dyn NotificationGateway>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn RequestStore>,
        links: Arc<dyn LinkIndex>,
        queue: Arc<dyn WorkQueue>,
        provider: Arc<dyn ArtifactProvider>,
        notifier: Arc<dyn NotificationGateway>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            links,
            queue,
            provider,
            notifier,
            config,
        }
    }

    /// Process one delivered work item. Always returns; the caller should
    /// acknowledge the delivery unless the outcome is
    /// [`WorkOutcome::Interrupted`].
    pub async fn handle(&self, message: WorkMessage) -> WorkOutcome {
        let id = message.request_id;
        let span = start_delivery_span(id);
        let started = Instant::now();

        let outcome = async {
            match self.deliver(id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let retry_after = self.config.retry.base_delay;
                    error!(request_id = %id, ?retry_after, "delivery interrupted: {e}");
                    WorkOutcome::Interrupted { retry_after }
                }
            }
        }
        .instrument(span)
        .await;

        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "worker.deliver")],
        );
        outcome
    }

    async fn deliver(&self, id: RequestId) -> Result<WorkOutcome> {
        let span = tracing::Span::current();

        let Some(request) = self.store.get_request(id).await? else {
            warn!(request_id = %id, "work item for unknown request, discarding");
            return Ok(WorkOutcome::Missing);
        };
        match request.status {
            RequestStatus::Done => return Ok(WorkOutcome::AlreadyDone),
            RequestStatus::Failed => return Ok(WorkOutcome::AlreadyFailed),
            RequestStatus::Queued | RequestStatus::Processing => {}
        }

        let retry = &self.config.retry;
        let Some(claimed) = self.store.claim_attempt(id, retry).await? else {
            return Ok(WorkOutcome::Superseded);
        };
        span.record("request.attempt", claimed.attempts);
        record_state_transition(&span, request.status, claimed.status);

        if claimed.status == RequestStatus::Failed {
            warn!(
                request_id = %id,
                attempts = claimed.attempts,
                max_attempts = retry.max_attempts,
                last_error = claimed.last_error.as_deref().unwrap_or("-"),
                "attempt ceiling exceeded, request failed"
            );
            return Ok(WorkOutcome::Exhausted {
                attempts: claimed.attempts,
            });
        }

        let spec = InviteSpec::new(
            format!("{}:{}", claimed.user_id, claimed.id),
            self.config
                .invite_ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .map(|ttl| Utc::now() + ttl),
        );

        match self.provider.create_invite(&spec).await {
            Ok(invite_link) => {
                metrics::provider_calls().add(1, &[KeyValue::new("result", "ok")]);
                self.finish(&claimed, &invite_link).await
            }
            Err(e) => {
                let result = if e.is_rate_limited() { "rate_limited" } else { "error" };
                metrics::provider_calls().add(1, &[KeyValue::new("result", result)]);
                self.retry_later(&claimed, e).await
            }
        }
    }

    async fn finish(&self, claimed: &InviteRequest, invite_link: &str) -> Result<WorkOutcome> {
        let span = tracing::Span::current();
        let Some(done) = self.store.complete(claimed.id, invite_link).await? else {
            warn!(request_id = %claimed.id, "request left processing during provider call");
            return Ok(WorkOutcome::Superseded);
        };
        record_state_transition(&span, RequestStatus::Processing, RequestStatus::Done);

        let digest = link_digest(invite_link);
        if let Err(e) = self
            .links
            .put_link(&LinkEntry::for_request(digest.clone(), &done))
            .await
        {
            // The request is already Done; a later delivery will not revisit it.
            error!(request_id = %done.id, %digest, "link index write failed: {e}");
        }

        info!(request_id = %done.id, attempts = done.attempts, "invite created");
        let created_notified = self.notify_created(&done).await?;
        Ok(WorkOutcome::Completed { created_notified })
    }

    async fn notify_created(&self, done: &InviteRequest) -> Result<bool> {
        if done.created_notified {
            return Ok(true);
        }
        let milestone = Milestone::created(done);
        if !self.notifier.send(&milestone).await {
            metrics::notifications().add(
                1,
                &[
                    KeyValue::new("event", milestone.event),
                    KeyValue::new("result", "failed"),
                ],
            );
            warn!(
                request_id = %done.id,
                "created notification failed; request is done so it will not be retried"
            );
            return Ok(false);
        }
        metrics::notifications().add(
            1,
            &[
                KeyValue::new("event", milestone.event),
                KeyValue::new("result", "sent"),
            ],
        );
        if let Err(e) = self.store.mark_created_notified(done.id).await {
            // Sent already; Done is terminal so nothing will send it again.
            warn!(request_id = %done.id, "created_notified flag not stored: {e}");
        }
        Ok(true)
    }

    async fn retry_later(&self, claimed: &InviteRequest, e: ProviderError) -> Result<WorkOutcome> {
        let span = tracing::Span::current();
        let rate_limited = e.is_rate_limited();
        let delay = self
            .config
            .retry
            .next_delay(claimed.attempts, e.retry_after());

        // Schedule before reverting: a failed revert leaves the record in
        // Processing, which the delayed redelivery can still claim.
        if let Err(schedule_err) = self.queue.schedule(claimed.id, delay).await {
            let retry_after = delay.max(self.config.retry.base_delay);
            error!(
                request_id = %claimed.id,
                ?retry_after,
                "retry scheduling failed after provider error ({e}): {schedule_err}"
            );
            return Ok(WorkOutcome::Interrupted { retry_after });
        }

        match self.store.requeue(claimed.id, &e.to_string()).await {
            Ok(true) => {
                record_state_transition(&span, RequestStatus::Processing, RequestStatus::Queued)
            }
            Ok(false) => {
                warn!(request_id = %claimed.id, "request left processing during provider call")
            }
            Err(requeue_err) => warn!(
                request_id = %claimed.id,
                "revert to queued failed, redelivery will re-claim: {requeue_err}"
            ),
        }

        warn!(
            request_id = %claimed.id,
            attempts = claimed.attempts,
            delay_secs = delay.as_secs(),
            rate_limited,
            "invite creation failed, retrying: {e}"
        );
        Ok(WorkOutcome::Rescheduled {
            delay,
            rate_limited,
        })
    }
}
