//! Integration tests for telemetry initialization and span helpers.

use hotseat::telemetry::{TelemetryConfig, init_telemetry, metrics, queue};
use opentelemetry::KeyValue;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so this may
    // return Err if another test got there first; that is acceptable.
    let config = TelemetryConfig::new("hotseat-test");
    assert!(config.endpoint.is_none());
    if let Ok(guard) = init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn queue_span_records_item_count() {
    let span = queue::start_op_span("lease", "hotseat_queue", "jobs");
    let _enter = span.enter();
    queue::record_items(&span, 3);
}

#[test]
fn instruments_are_noops_without_provider() {
    let labels = [KeyValue::new("queue", "hotseat_queue")];
    metrics::queue_operations().add(1, &[labels[0].clone(), KeyValue::new("operation", "lease")]);
    metrics::items_leased().add(2, &labels);
    metrics::lease_conflicts().add(1, &labels);
    metrics::bulk_errors().add(1, &[labels[0].clone(), KeyValue::new("reason", "missing")]);
    metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "lease")]);
}
