//! Notification gateway: fire-and-report milestone events.
//!
//! One attempt per call, no retries. Callers gate re-firing on the stored
//! `created_notified` / `joined` flags.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::warn;

use crate::model::InviteRequest;

/// Milestone event names.
pub const INVITE_CREATED: &str = "invite_created";
pub const INVITE_JOINED: &str = "invite_joined";

/// One outbound milestone event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Milestone {
    pub user_id: String,
    pub event: &'static str,
    pub payload: serde_json::Value,
}

impl Milestone {
    pub fn created(request: &InviteRequest) -> Self {
        Self {
            user_id: request.user_id.clone(),
            event: INVITE_CREATED,
            payload: serde_json::json!({
                "request_id": request.id,
                "correlation_id": request.correlation_id,
                "invite_link": request.invite_link,
            }),
        }
    }

    pub fn joined(request: &InviteRequest) -> Self {
        Self {
            user_id: request.user_id.clone(),
            event: INVITE_JOINED,
            payload: serde_json::json!({
                "request_id": request.id,
                "correlation_id": request.correlation_id,
                "member_id": request.member_id,
                "joined_at": request.joined_at,
            }),
        }
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver the event. True only if the gateway accepted it.
    async fn send(&self, milestone: &Milestone) -> bool;
}

/// JSON-over-HTTP gateway. Any 2xx is success.
pub struct HttpNotifier {
    http: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpNotifier {
    pub fn new(http: reqwest::Client, url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            http,
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl NotificationGateway for HttpNotifier {
    async fn send(&self, milestone: &Milestone) -> bool {
        let mut request = self.http.post(&self.url).json(milestone);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    event = milestone.event,
                    status = response.status().as_u16(),
                    "notification rejected"
                );
                false
            }
            Err(e) => {
                warn!(event = milestone.event, "notification transport error: {e}");
                false
            }
        }
    }
}
