//! Invite request records and their lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Invite Request
// ---------------------------------------------------------------------------

/// One access-grant attempt tracked from intake to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRequest {
    /// Unique identifier.
    pub id: RequestId,

    /// Identity of the user the invite is generated for.
    pub user_id: String,

    /// Caller-supplied correlation identifier, echoed into notifications.
    pub correlation_id: Option<String>,

    /// Current lifecycle state.
    pub status: RequestStatus,

    /// Number of deliveries that reached the processing stage.
    pub attempts: u32,

    /// The generated invite. Present iff `status == Done`.
    pub invite_link: Option<String>,

    /// The "invite_created" milestone was accepted by the gateway.
    pub created_notified: bool,

    /// The invite has been used to join the channel.
    pub joined: bool,

    /// Channel-side identity of the member who joined.
    pub member_id: Option<String>,

    pub joined_at: Option<DateTime<Utc>>,

    /// Text of the most recent provider failure, if any.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InviteRequest {
    /// A fresh record in `Queued` with zero attempts.
    pub fn queued(new: NewInviteRequest) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new(),
            user_id: new.user_id,
            correlation_id: new.correlation_id,
            status: RequestStatus::Queued,
            attempts: 0,
            invite_link: None,
            created_notified: false,
            joined: false,
            member_id: None,
            joined_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Newtype for request IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::Validation(format!("malformed request id: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of an invite request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for a worker delivery.
    Queued,
    /// A worker is calling the provider.
    Processing,
    /// Invite generated. Terminal.
    Done,
    /// Attempt ceiling exceeded. Terminal.
    Failed,
}

impl RequestStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, to),
            (Queued, Processing)
                | (Processing, Processing) // re-claim after a crashed delivery
                | (Processing, Queued)     // rate limited or hard failure
                | (Processing, Done)
                | (Queued, Failed)
                | (Processing, Failed)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Done | RequestStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Queued => "queued",
            RequestStatus::Processing => "processing",
            RequestStatus::Done => "done",
            RequestStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(RequestStatus::Queued),
            "processing" => Ok(RequestStatus::Processing),
            "done" => Ok(RequestStatus::Done),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(Error::Other(format!("unknown request status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Intake input
// ---------------------------------------------------------------------------

/// Parameters accepted by intake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewInviteRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl NewInviteRequest {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            correlation_id: None,
        }
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Queue payload
// ---------------------------------------------------------------------------

/// Body of a work item on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMessage {
    pub request_id: RequestId,
}
