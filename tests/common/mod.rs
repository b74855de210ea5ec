//! Shared fixtures: in-memory store and queue, scripted provider, recording
//! notifier.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use invitegate::backoff::RetryPolicy;
use invitegate::error::{Error, Result};
use invitegate::intake::Intake;
use invitegate::model::{InviteRequest, RequestId};
use invitegate::notify::{Milestone, NotificationGateway};
use invitegate::provider::{ArtifactProvider, InviteSpec, ProviderError};
use invitegate::queue::{MemoryQueue, WorkQueue};
use invitegate::store::memory::MemoryStore;
use invitegate::store::{JoinTransition, RequestStore};
use invitegate::webhook::WebhookHandler;
use invitegate::worker::{Worker, WorkerConfig};

/// One scripted provider reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Link(String),
    RateLimited(Option<u64>),
    Reject,
}

/// Replays scripted replies, then succeeds with generated links.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    specs: Mutex<Vec<InviteSpec>>,
}

impl ScriptedProvider {
    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn specs(&self) -> Vec<InviteSpec> {
        self.specs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactProvider for ScriptedProvider {
    async fn create_invite(&self, spec: &InviteSpec) -> std::result::Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Ok(format!("https://t.me/+generated{n}")),
            Some(Reply::Link(link)) => Ok(link),
            Some(Reply::RateLimited(secs)) => Err(ProviderError::RateLimited {
                retry_after: secs.map(Duration::from_secs),
            }),
            Some(Reply::Reject) => Err(ProviderError::Rejected {
                code: 400,
                description: "Bad Request: chat not found".to_string(),
            }),
        }
    }
}

/// Records every milestone; succeeds unless told otherwise.
pub struct RecordingNotifier {
    sent: Mutex<Vec<Milestone>>,
    succeed: AtomicBool,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            succeed: AtomicBool::new(true),
        }
    }
}

impl RecordingNotifier {
    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Milestone> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.sent().iter().filter(|m| m.event == event).count()
    }
}

#[async_trait]
impl NotificationGateway for RecordingNotifier {
    async fn send(&self, milestone: &Milestone) -> bool {
        self.sent.lock().unwrap().push(milestone.clone());
        self.succeed.load(Ordering::SeqCst)
    }
}

/// Store operations [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Requeue,
    MarkCreatedNotified,
}

/// Delegates to a [`MemoryStore`], failing the selected operations.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    failing: Mutex<Vec<StoreOp>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self, op: StoreOp) {
        self.failing.lock().unwrap().push(op);
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(Error::Other(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl RequestStore for FaultyStore {
    async fn insert_request(&self, request: &InviteRequest) -> Result<()> {
        self.inner.insert_request(request).await
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<InviteRequest>> {
        self.check(StoreOp::Get)?;
        self.inner.get_request(id).await
    }

    async fn claim_attempt(
        &self,
        id: RequestId,
        policy: &RetryPolicy,
    ) -> Result<Option<InviteRequest>> {
        self.inner.claim_attempt(id, policy).await
    }

    async fn requeue(&self, id: RequestId, error: &str) -> Result<bool> {
        self.check(StoreOp::Requeue)?;
        self.inner.requeue(id, error).await
    }

    async fn complete(&self, id: RequestId, invite_link: &str) -> Result<Option<InviteRequest>> {
        self.inner.complete(id, invite_link).await
    }

    async fn mark_created_notified(&self, id: RequestId) -> Result<bool> {
        self.check(StoreOp::MarkCreatedNotified)?;
        self.inner.mark_created_notified(id).await
    }

    async fn mark_joined(
        &self,
        id: RequestId,
        member_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<JoinTransition> {
        self.inner.mark_joined(id, member_id, at).await
    }
}

/// Delegates to a [`MemoryQueue`] unless told to fail.
pub struct FaultyQueue {
    inner: Arc<MemoryQueue>,
    failing: AtomicBool,
}

impl FaultyQueue {
    pub fn new(inner: Arc<MemoryQueue>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkQueue for FaultyQueue {
    async fn schedule(&self, request_id: RequestId, delay: Duration) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Other("injected schedule failure".to_string()));
        }
        self.inner.schedule(request_id, delay).await
    }
}

/// Everything wired over in-memory collaborators. The worker reaches the
/// store and queue through [`FaultyStore`] / [`FaultyQueue`], which pass
/// through until a test injects a failure.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub provider: Arc<ScriptedProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub faulty_store: Arc<FaultyStore>,
    pub faulty_queue: Arc<FaultyQueue>,
    pub intake: Intake,
    pub worker: Worker,
    pub webhook: WebhookHandler,
}

pub fn policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(3600))
}

impl Harness {
    pub fn new() -> Self {
        Self::with(policy(), true)
    }

    pub fn with(retry: RetryPolicy, notify_on_join: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let provider = Arc::new(ScriptedProvider::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let faulty_store = Arc::new(FaultyStore::new(store.clone()));
        let faulty_queue = Arc::new(FaultyQueue::new(queue.clone()));

        let intake = Intake::new(store.clone(), queue.clone());
        let worker = Worker::new(
            faulty_store.clone(),
            store.clone(),
            faulty_queue.clone(),
            provider.clone(),
            notifier.clone(),
            WorkerConfig {
                retry,
                invite_ttl: None,
            },
        );
        let webhook = WebhookHandler::new(store.clone(), store.clone(), notifier.clone(), notify_on_join);

        Self {
            store,
            queue,
            provider,
            notifier,
            faulty_store,
            faulty_queue,
            intake,
            worker,
            webhook,
        }
    }
}
