//! Content-addressed keys for generated invite links.
//!
//! The webhook only carries the invite link itself, so the link index is
//! keyed by a fixed-length hash of it rather than scanned.

use sha2::{Digest as _, Sha256};

use crate::model::Digest;

/// SHA-256 of the link, lowercase hex. Surrounding whitespace is ignored.
pub fn link_digest(invite_link: &str) -> Digest {
    let hash = Sha256::digest(invite_link.trim().as_bytes());
    Digest(hex::encode(hash))
}
