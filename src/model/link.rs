//! Link index entries: digest of a generated invite → owning request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::{InviteRequest, RequestId};

/// Lowercase hex SHA-256 of an invite link. See [`crate::digest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(pub String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reverse-lookup record written once per completed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub digest: Digest,
    pub request_id: RequestId,
    pub user_id: String,
    pub correlation_id: Option<String>,
    /// Backfilled the first time a join through this link is seen.
    pub member_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LinkEntry {
    /// Build the entry for a request that just reached `Done`.
    pub fn for_request(digest: Digest, request: &InviteRequest) -> Self {
        Self {
            digest,
            request_id: request.id,
            user_id: request.user_id.clone(),
            correlation_id: request.correlation_id.clone(),
            member_id: None,
            created_at: Utc::now(),
        }
    }
}
