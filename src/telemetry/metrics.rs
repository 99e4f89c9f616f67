//! Metric instrument factories for hotseat.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a registered provider the instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("hotseat")
}

/// Counter: queue operations performed.
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("hotseat.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: documents successfully leased.
/// Labels: `queue`.
pub fn items_leased() -> Counter<u64> {
    meter()
        .u64_counter("hotseat.lease.items")
        .with_description("Number of documents leased")
        .build()
}

/// Counter: lease candidates lost to a concurrent writer.
/// Labels: `queue`.
pub fn lease_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("hotseat.lease.conflicts")
        .with_description("Lease candidates dropped because of write conflicts")
        .build()
}

/// Counter: ids a bulk operation could not process.
/// Labels: `queue`, `reason`.
pub fn bulk_errors() -> Counter<u64> {
    meter()
        .u64_counter("hotseat.bulk.errors")
        .with_description("Ids skipped or rejected by bulk operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("hotseat.operation.duration_ms")
        .with_description("Queue operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
