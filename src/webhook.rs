//! Join confirmation: resolve an inbound membership event to its request and
//! flip `joined` exactly once.
//!
//! The sender redelivers on transport errors, so the same event can arrive
//! any number of times, possibly concurrently. The store's conditional
//! `mark_joined` is the only gate on the "invite_joined" notification.

use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, error, info, warn};

use crate::digest::link_digest;
use crate::error::Result;
use crate::model::Digest;
use crate::notify::{Milestone, NotificationGateway};
use crate::store::{JoinTransition, LinkIndex, RequestStore};
use crate::telemetry::metrics;
use crate::telemetry::request::start_join_span;

// ---------------------------------------------------------------------------
// Canonical event
// ---------------------------------------------------------------------------

/// Membership status reported by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberStatus {
    Member,
    Administrator,
    Creator,
    Other(String),
}

impl MemberStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "member" => MemberStatus::Member,
            "administrator" => MemberStatus::Administrator,
            "creator" => MemberStatus::Creator,
            other => MemberStatus::Other(other.to_string()),
        }
    }

    /// Does this status mean the actor is now in the channel?
    pub fn is_membership(&self) -> bool {
        !matches!(self, MemberStatus::Other(_))
    }
}

/// A join event after boundary decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEvent {
    pub invite_link: String,
    pub status: MemberStatus,
    pub member_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

/// Member ids arrive as numbers from the provider and as strings from relays.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Int(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Update { chat_member: ChatMemberUpdated },
    Flat(FlatJoin),
}

#[derive(Debug, Deserialize)]
struct ChatMemberUpdated {
    #[serde(default)]
    invite_link: Option<ChatInviteLink>,
    new_chat_member: ChatMember,
}

#[derive(Debug, Deserialize)]
struct ChatInviteLink {
    invite_link: String,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: RawId,
}

#[derive(Debug, Deserialize)]
struct FlatJoin {
    invite_link: String,
    status: String,
    #[serde(default)]
    user_id: Option<RawId>,
}

/// Decode any supported payload shape into a [`JoinEvent`].
///
/// `None` when the payload carries no invite link or matches no known shape.
pub fn decode_join_event(payload: &serde_json::Value) -> Option<JoinEvent> {
    match RawPayload::deserialize(payload).ok()? {
        RawPayload::Update { chat_member } => Some(JoinEvent {
            invite_link: chat_member.invite_link?.invite_link,
            status: MemberStatus::parse(&chat_member.new_chat_member.status),
            member_id: chat_member
                .new_chat_member
                .user
                .map(|u| u.id.into_string()),
        }),
        RawPayload::Flat(flat) => Some(JoinEvent {
            invite_link: flat.invite_link,
            status: MemberStatus::parse(&flat.status),
            member_id: flat.user_id.map(RawId::into_string),
        }),
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Acknowledgement returned to the sender. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinAck {
    /// Not a membership event, not decodable, or failed internally.
    Ignored,
    /// No request owns this invite.
    NotFound,
    /// Join recorded, now or by an earlier delivery.
    Ok,
}

impl JoinAck {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinAck::Ignored => "ignored",
            JoinAck::NotFound => "not_found",
            JoinAck::Ok => "ok",
        }
    }
}

#[derive(Clone)]
pub struct WebhookHandler {
    store: Arc<dyn RequestStore>,
    links: Arc<dyn LinkIndex>,
    notifier: Arc<dyn NotificationGateway>,
    notify_on_join: bool,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn RequestStore>,
        links: Arc<dyn LinkIndex>,
        notifier: Arc<dyn NotificationGateway>,
        notify_on_join: bool,
    ) -> Self {
        Self {
            store,
            links,
            notifier,
            notify_on_join,
        }
    }

    /// Decode and handle a raw payload.
    pub async fn handle_payload(&self, payload: &serde_json::Value) -> JoinAck {
        match decode_join_event(payload) {
            Some(event) => self.handle(event).await,
            None => {
                debug!("webhook payload is not a join event");
                record_ack(JoinAck::Ignored)
            }
        }
    }

    /// Handle one join event. Internal failures are logged and acknowledged
    /// as [`JoinAck::Ignored`].
    pub async fn handle(&self, event: JoinEvent) -> JoinAck {
        if !event.status.is_membership() {
            debug!(status = ?event.status, "non-membership status, ignoring");
            return record_ack(JoinAck::Ignored);
        }

        let digest = link_digest(&event.invite_link);
        let span = start_join_span(digest.as_str());
        let ack = match self.confirm(event, &digest).instrument(span).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(%digest, "join handling failed: {e}");
                JoinAck::Ignored
            }
        };
        record_ack(ack)
    }

    async fn confirm(&self, event: JoinEvent, digest: &Digest) -> Result<JoinAck> {
        let Some(entry) = self.links.get_link(digest).await? else {
            info!(%digest, "join via unknown invite");
            return Ok(JoinAck::NotFound);
        };
        tracing::Span::current().record("request.id", tracing::field::display(entry.request_id));

        let joined = match self
            .store
            .mark_joined(entry.request_id, event.member_id.as_deref(), Utc::now())
            .await?
        {
            JoinTransition::Joined(request) => request,
            JoinTransition::AlreadyJoined => {
                debug!(request_id = %entry.request_id, "duplicate join event");
                return Ok(JoinAck::Ok);
            }
            JoinTransition::Missing => {
                warn!(request_id = %entry.request_id, "link index points at missing request");
                return Ok(JoinAck::NotFound);
            }
        };

        info!(
            request_id = %joined.id,
            member_id = joined.member_id.as_deref().unwrap_or("-"),
            "invite joined"
        );

        if let Some(ref member_id) = event.member_id {
            if let Err(e) = self.links.backfill_member(digest, member_id).await {
                warn!(%digest, "member backfill failed: {e}");
            }
        }

        self.notify_joined(&Milestone::joined(&joined)).await;
        Ok(JoinAck::Ok)
    }

    async fn notify_joined(&self, milestone: &Milestone) {
        let result = if !self.notify_on_join {
            "disabled"
        } else if self.notifier.send(milestone).await {
            "sent"
        } else {
            warn!(user_id = %milestone.user_id, "joined notification failed; not retried");
            "failed"
        };
        metrics::notifications().add(
            1,
            &[
                KeyValue::new("event", milestone.event),
                KeyValue::new("result", result),
            ],
        );
    }
}

fn record_ack(ack: JoinAck) -> JoinAck {
    metrics::webhook_results().add(1, &[KeyValue::new("result", ack.as_str())]);
    ack
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_provider_update() {
        let payload = json!({
            "update_id": 1,
            "chat_member": {
                "chat": {"id": -100},
                "from": {"id": 7},
                "date": 1700000000,
                "old_chat_member": {"status": "left", "user": {"id": 7}},
                "new_chat_member": {"status": "member", "user": {"id": 7, "is_bot": false}},
                "invite_link": {"invite_link": "https://t.me/+abc", "creates_join_request": false}
            }
        });
        let event = decode_join_event(&payload).unwrap();
        assert_eq!(event.invite_link, "https://t.me/+abc");
        assert_eq!(event.status, MemberStatus::Member);
        assert_eq!(event.member_id.as_deref(), Some("7"));
    }

    #[test]
    fn decodes_flat_shape_with_string_id() {
        let payload = json!({"invite_link": "https://t.me/+abc", "status": "Member", "user_id": "u-7"});
        let event = decode_join_event(&payload).unwrap();
        assert_eq!(event.status, MemberStatus::Member);
        assert_eq!(event.member_id.as_deref(), Some("u-7"));
    }

    #[test]
    fn update_without_link_is_not_an_event() {
        let payload = json!({
            "chat_member": {"new_chat_member": {"status": "member", "user": {"id": 7}}}
        });
        assert!(decode_join_event(&payload).is_none());
    }

    #[test]
    fn unrelated_payload_is_not_an_event() {
        assert!(decode_join_event(&json!({"message": {"text": "hi"}})).is_none());
    }

    #[test]
    fn only_membership_statuses_count() {
        assert!(MemberStatus::parse("member").is_membership());
        assert!(MemberStatus::parse("administrator").is_membership());
        assert!(MemberStatus::parse("creator").is_membership());
        for s in ["left", "kicked", "restricted", "pending"] {
            assert!(!MemberStatus::parse(s).is_membership(), "{s}");
        }
    }
}
