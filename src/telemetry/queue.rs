//! Span helpers for queue operations.

use tracing::Span;

/// Start a span for one queue operation.
///
/// `queue.items` is declared empty and filled via [`record_items`] once
/// the operation knows how many documents it touched.
pub fn start_op_span(operation: &'static str, design: &str, db: &str) -> Span {
    tracing::info_span!(
        "queue.op",
        "queue.operation" = operation,
        "queue.design" = design,
        "queue.db" = db,
        "queue.items" = tracing::field::Empty,
    )
}

/// Record how many documents an operation wrote.
pub fn record_items(span: &Span, items: usize) {
    span.record("queue.items", items as u64);
}
