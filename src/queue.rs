//! Work queue seam.
//!
//! Delivery is at-least-once and may reorder. Retries are always expressed as
//! an explicit delayed [`WorkQueue::schedule`], never by failing a delivery.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{RequestId, WorkMessage};

/// Name of the pgmq queue carrying [`WorkMessage`]s.
pub const WORK_QUEUE: &str = "invite_work";

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a work item for `request_id`, visible after `delay`.
    async fn schedule(&self, request_id: RequestId, delay: Duration) -> Result<()>;
}

/// A scheduled work item captured by [`MemoryQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub message: WorkMessage,
    pub delay: Duration,
}

/// Records scheduled work instead of delivering it. Tests drain it and feed
/// the messages to the worker by hand.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: Mutex<Vec<Scheduled>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything scheduled so far, oldest first.
    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Remove and return everything scheduled so far.
    pub fn drain(&self) -> Vec<Scheduled> {
        std::mem::take(
            &mut *self
                .items
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn schedule(&self, request_id: RequestId, delay: Duration) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Scheduled {
                message: WorkMessage { request_id },
                delay,
            });
        Ok(())
    }
}
