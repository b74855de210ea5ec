//! Intake: admit a request and hand it to the queue.
//!
//! Returns as soon as the record is stored and the work item is scheduled;
//! nothing here waits on the provider.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{InviteRequest, NewInviteRequest, RequestId};
use crate::queue::WorkQueue;
use crate::store::RequestStore;
use crate::telemetry::metrics;

#[derive(Clone)]
pub struct Intake {
    store: Arc<dyn RequestStore>,
    queue: Arc<dyn WorkQueue>,
}

impl Intake {
    pub fn new(store: Arc<dyn RequestStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { store, queue }
    }

    /// Create a `Queued` request and schedule its first delivery.
    pub async fn submit(&self, new: NewInviteRequest) -> Result<InviteRequest> {
        let new = match normalize(new) {
            Ok(new) => new,
            Err(e) => {
                metrics::requests_submitted().add(1, &[KeyValue::new("result", "invalid")]);
                return Err(e);
            }
        };

        let request = InviteRequest::queued(new);
        let scheduled = async {
            self.store.insert_request(&request).await?;
            self.queue.schedule(request.id, Duration::ZERO).await
        }
        .await;

        if let Err(e) = scheduled {
            warn!(request_id = %request.id, "intake failed: {e}");
            metrics::requests_submitted().add(1, &[KeyValue::new("result", "error")]);
            return Err(e);
        }

        info!(
            request_id = %request.id,
            user_id = %request.user_id,
            correlation_id = request.correlation_id.as_deref().unwrap_or("-"),
            "invite request queued"
        );
        metrics::requests_submitted().add(1, &[KeyValue::new("result", "ok")]);
        Ok(request)
    }

    /// Schedule another delivery for a request that is not yet terminal.
    ///
    /// Recovers a record whose work item was lost, e.g. a crash between
    /// storing it and scheduling it.
    pub async fn requeue(&self, id: RequestId) -> Result<InviteRequest> {
        let request = self
            .store
            .get_request(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("request {id}")))?;
        if request.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: request.status,
                to: crate::model::RequestStatus::Queued,
            });
        }
        self.queue.schedule(id, Duration::ZERO).await?;
        info!(request_id = %id, status = %request.status, "request rescheduled by operator");
        Ok(request)
    }
}

fn normalize(new: NewInviteRequest) -> Result<NewInviteRequest> {
    let user_id = new.user_id.trim();
    if user_id.is_empty() {
        return Err(Error::Validation("user_id is required".to_string()));
    }
    Ok(NewInviteRequest {
        user_id: user_id.to_string(),
        correlation_id: new
            .correlation_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
    })
}
