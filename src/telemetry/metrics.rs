//! Metric instrument factories for workq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workq"` meter. Without a
//! registered provider the global meter is a no-op, so stores record
//! unconditionally.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

use crate::model::Status;

/// Returns the shared meter for workq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: items inserted by enqueue / enqueue_batch.
/// Labels: `task_type`.
pub fn items_enqueued_counter() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.enqueued")
        .with_description("Number of queue items enqueued")
        .build()
}

/// Counter: successful claims.
/// Labels: `task_type`.
pub fn items_claimed_counter() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.claimed")
        .with_description("Number of queue items claimed by workers")
        .build()
}

/// Counter: status transitions.
/// Labels: `from`, `to`.
pub fn state_transitions_counter() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.state_transitions")
        .with_description("Number of queue item status transitions")
        .build()
}

/// Counter: stale claims released by housekeeping.
/// Labels: `to` ("queued" | "dead").
pub fn items_reclaimed_counter() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.reclaimed")
        .with_description("Number of stale claims reclaimed")
        .build()
}

/// Counter: terminal items deleted by purges.
/// Labels: `status`.
pub fn items_purged_counter() -> Counter<u64> {
    meter()
        .u64_counter("workq.items.purged")
        .with_description("Number of terminal queue items purged")
        .build()
}

/// Histogram: handler execution time in milliseconds.
/// Labels: `task_type`, `result` ("ok" | "error").
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.handler.duration_ms")
        .with_description("Worker handler duration in milliseconds")
        .with_unit("ms")
        .build()
}

pub fn items_enqueued(task_type: &str, n: u64) {
    items_enqueued_counter().add(n, &[KeyValue::new("task_type", task_type.to_string())]);
}

pub fn items_claimed(task_type: &str) {
    items_claimed_counter().add(1, &[KeyValue::new("task_type", task_type.to_string())]);
}

pub fn state_transition(from: Status, to: Status) {
    state_transitions_counter().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}

pub fn items_reclaimed(to: Status, n: u64) {
    if n > 0 {
        items_reclaimed_counter().add(n, &[KeyValue::new("to", to.as_str())]);
    }
}

pub fn items_purged(status: Status, n: u64) {
    items_purged_counter().add(n, &[KeyValue::new("status", status.as_str())]);
}
