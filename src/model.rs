//! Core data model.
//!
//! An invite request is one attempt to grant a user access to the gated
//! channel. A link entry maps the digest of a generated invite back to the
//! request that owns it.

pub mod link;
pub mod request;

pub use link::{Digest, LinkEntry};
pub use request::{InviteRequest, NewInviteRequest, RequestId, RequestStatus, WorkMessage};
