//! Per-request span helpers.

use tracing::Span;

use crate::model::{RequestId, RequestStatus};

/// Span covering one worker delivery of a request.
///
/// `request.attempt` is filled in once the claim has counted the delivery.
pub fn start_delivery_span(id: RequestId) -> Span {
    tracing::info_span!(
        "request.deliver",
        "request.id" = %id,
        "request.attempt" = tracing::field::Empty,
    )
}

/// Span covering one inbound join event.
pub fn start_join_span(digest: &str) -> Span {
    tracing::info_span!(
        "request.join",
        "link.digest" = digest,
        "request.id" = tracing::field::Empty,
    )
}

/// Emit a state-transition event inside `span`.
pub fn record_state_transition(span: &Span, from: RequestStatus, to: RequestStatus) {
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}
