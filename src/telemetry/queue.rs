//! Queue item span helpers.
//!
//! Provides span creation and state-transition recording for items
//! flowing through a worker.

use tracing::Span;

use crate::model::QueueItem;

/// Start a span for processing one claimed item.
///
/// The `item.outcome` field is declared empty and filled in once the
/// handler returns.
pub fn start_item_span(item: &QueueItem) -> Span {
    tracing::info_span!(
        "queue.process",
        "item.id" = %item.id,
        "item.task_type" = %item.task_type,
        "item.attempt" = item.attempt_count,
        "item.worker_id" = item.worker_id.as_deref().unwrap_or_default(),
        "item.outcome" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("item.outcome", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
