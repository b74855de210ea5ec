//! In-process store for tests and local runs.
//!
//! Each operation takes the map lock once, so every conditional update is
//! atomic with respect to concurrent callers, matching the row-level
//! guarantees of the Postgres store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{JoinTransition, LinkIndex, RequestStore};
use crate::backoff::RetryPolicy;
use crate::error::{Error, Result};
use crate::model::{Digest, InviteRequest, LinkEntry, RequestId, RequestStatus};

#[derive(Debug, Default)]
pub struct MemoryStore {
    requests: Mutex<HashMap<RequestId, InviteRequest>>,
    links: Mutex<HashMap<Digest, LinkEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored requests.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Number of link index entries.
    pub fn link_count(&self) -> usize {
        lock(&self.links).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A poisoned lock only means another test thread panicked mid-update.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert_request(&self, request: &InviteRequest) -> Result<()> {
        let mut requests = lock(&self.requests);
        if requests.contains_key(&request.id) {
            return Err(Error::Other(format!("duplicate request id {}", request.id)));
        }
        requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<InviteRequest>> {
        Ok(lock(&self.requests).get(&id).cloned())
    }

    async fn claim_attempt(
        &self,
        id: RequestId,
        policy: &RetryPolicy,
    ) -> Result<Option<InviteRequest>> {
        let mut requests = lock(&self.requests);
        let Some(request) = requests.get_mut(&id) else {
            return Ok(None);
        };
        let attempts = request.attempts + 1;
        let next = if policy.exhausted(attempts) {
            RequestStatus::Failed
        } else {
            RequestStatus::Processing
        };
        if !request.status.can_transition_to(next) {
            return Ok(None);
        }
        request.attempts = attempts;
        request.status = next;
        request.updated_at = Utc::now();
        Ok(Some(request.clone()))
    }

    async fn requeue(&self, id: RequestId, error: &str) -> Result<bool> {
        let mut requests = lock(&self.requests);
        match requests.get_mut(&id) {
            Some(request) if request.status.can_transition_to(RequestStatus::Queued) => {
                request.status = RequestStatus::Queued;
                request.last_error = Some(error.to_string());
                request.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, id: RequestId, invite_link: &str) -> Result<Option<InviteRequest>> {
        let mut requests = lock(&self.requests);
        match requests.get_mut(&id) {
            Some(request) if request.status.can_transition_to(RequestStatus::Done) => {
                request.status = RequestStatus::Done;
                request.invite_link = Some(invite_link.to_string());
                request.last_error = None;
                request.updated_at = Utc::now();
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_created_notified(&self, id: RequestId) -> Result<bool> {
        let mut requests = lock(&self.requests);
        match requests.get_mut(&id) {
            Some(request) if !request.created_notified => {
                request.created_notified = true;
                request.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_joined(
        &self,
        id: RequestId,
        member_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<JoinTransition> {
        let mut requests = lock(&self.requests);
        let Some(request) = requests.get_mut(&id) else {
            return Ok(JoinTransition::Missing);
        };
        if request.joined {
            return Ok(JoinTransition::AlreadyJoined);
        }
        request.joined = true;
        request.joined_at = Some(at);
        if request.member_id.is_none() {
            request.member_id = member_id.map(str::to_string);
        }
        request.updated_at = Utc::now();
        Ok(JoinTransition::Joined(request.clone()))
    }
}

#[async_trait]
impl LinkIndex for MemoryStore {
    async fn put_link(&self, entry: &LinkEntry) -> Result<()> {
        let mut links = lock(&self.links);
        match links.get(&entry.digest) {
            Some(existing) if existing.request_id == entry.request_id => Ok(()),
            Some(existing) => Err(Error::LinkConflict {
                digest: entry.digest.to_string(),
                existing: existing.request_id.to_string(),
            }),
            None => {
                links.insert(entry.digest.clone(), entry.clone());
                Ok(())
            }
        }
    }

    async fn get_link(&self, digest: &Digest) -> Result<Option<LinkEntry>> {
        Ok(lock(&self.links).get(digest).cloned())
    }

    async fn backfill_member(&self, digest: &Digest, member_id: &str) -> Result<bool> {
        let mut links = lock(&self.links);
        match links.get_mut(digest) {
            Some(entry) if entry.member_id.is_none() => {
                entry.member_id = Some(member_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
