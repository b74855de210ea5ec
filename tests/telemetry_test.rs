//! Telemetry initialization and span helpers.

use invitegate::model::{RequestId, RequestStatus};
use invitegate::telemetry::{TelemetryConfig, init_telemetry, metrics, request};
use opentelemetry::KeyValue;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Only one global subscriber per process; a second init returns Err.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "invitegate-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = init_telemetry(config);
}

#[test]
fn delivery_span_records_attempt_and_transition() {
    let span = request::start_delivery_span(RequestId::new());
    span.record("request.attempt", 2u32);
    request::record_state_transition(&span, RequestStatus::Queued, RequestStatus::Processing);
}

#[test]
fn join_span_accepts_request_id() {
    let span = request::start_join_span("ab12");
    span.record("request.id", tracing::field::display(RequestId::new()));
}

#[test]
fn metric_instruments_work_without_a_provider() {
    metrics::requests_submitted().add(1, &[KeyValue::new("result", "ok")]);
    metrics::webhook_results().add(1, &[KeyValue::new("result", "ignored")]);
    metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "test")]);
}
