//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! With no provider installed these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("invitegate")
}

/// Counter: intake submissions.
/// Labels: `result` ("ok" | "invalid" | "error").
pub fn requests_submitted() -> Counter<u64> {
    meter()
        .u64_counter("invitegate.requests.submitted")
        .with_description("Invite requests accepted by intake")
        .build()
}

/// Counter: request status transitions.
/// Labels: `from`, `to`.
pub fn request_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("invitegate.requests.state_transitions")
        .with_description("Invite request status transitions")
        .build()
}

/// Counter: queue-level operations.
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("invitegate.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: provider invite calls.
/// Labels: `result` ("ok" | "rate_limited" | "error").
pub fn provider_calls() -> Counter<u64> {
    meter()
        .u64_counter("invitegate.provider.calls")
        .with_description("Invite link creation calls")
        .build()
}

/// Counter: milestone notifications.
/// Labels: `event`, `result` ("sent" | "failed" | "disabled").
pub fn notifications() -> Counter<u64> {
    meter()
        .u64_counter("invitegate.notifications")
        .with_description("Milestone notifications attempted")
        .build()
}

/// Counter: webhook acknowledgements.
/// Labels: `result` ("ignored" | "not_found" | "ok").
pub fn webhook_results() -> Counter<u64> {
    meter()
        .u64_counter("invitegate.webhook.results")
        .with_description("Join webhook outcomes")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("invitegate.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
