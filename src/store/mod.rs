//! Persistence seams for request records and the link index.
//!
//! Every mutating call is a single conditional update against one record, so
//! the Worker and the Webhook Handler never need a cross-record lock. The
//! Postgres implementations live in [`crate::db`]; [`memory::MemoryStore`]
//! backs tests and local runs.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backoff::RetryPolicy;
use crate::error::Result;
use crate::model::{Digest, InviteRequest, LinkEntry, RequestId};

/// Result of the atomic join transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTransition {
    /// This call flipped `joined` from false to true.
    Joined(InviteRequest),
    /// The flag was already set; nothing changed.
    AlreadyJoined,
    /// No record with that id.
    Missing,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a new record.
    async fn insert_request(&self, request: &InviteRequest) -> Result<()>;

    async fn get_request(&self, id: RequestId) -> Result<Option<InviteRequest>>;

    /// Begin a delivery: increment `attempts` and move to `Processing`, or to
    /// `Failed` once `policy` says the new count is exhausted. Applies only to
    /// `Queued`/`Processing` records; returns `None` otherwise.
    async fn claim_attempt(
        &self,
        id: RequestId,
        policy: &RetryPolicy,
    ) -> Result<Option<InviteRequest>>;

    /// `Processing` → `Queued`, recording the failure text. False if the
    /// record was not `Processing`.
    async fn requeue(&self, id: RequestId, error: &str) -> Result<bool>;

    /// `Processing` → `Done` with the generated link.
    async fn complete(&self, id: RequestId, invite_link: &str) -> Result<Option<InviteRequest>>;

    /// Set `created_notified` if it is still false.
    async fn mark_created_notified(&self, id: RequestId) -> Result<bool>;

    /// Set `joined` if it is still false, stamping `joined_at` and filling
    /// `member_id` when unknown.
    async fn mark_joined(
        &self,
        id: RequestId,
        member_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<JoinTransition>;
}

#[async_trait]
pub trait LinkIndex: Send + Sync {
    /// Insert an entry. Re-inserting the same owner is a no-op; a different
    /// owner for the same digest is [`crate::error::Error::LinkConflict`].
    async fn put_link(&self, entry: &LinkEntry) -> Result<()>;

    async fn get_link(&self, digest: &Digest) -> Result<Option<LinkEntry>>;

    /// Fill `member_id` if it is still absent.
    async fn backfill_member(&self, digest: &Digest, member_id: &str) -> Result<bool>;
}
