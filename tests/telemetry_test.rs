//! Integration tests for telemetry initialization and span helpers.

use workq::model::NewQueueItem;
use workq::queue::{MemoryQueue, QueueStore};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; another test
    // may already have set one, which is acceptable.
    let config = workq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "workq-test".to_string(),
        log_level: "debug".to_string(),
    };
    if let Ok(guard) = workq::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[tokio::test]
async fn item_span_creates_and_records_transition() {
    let queue = MemoryQueue::new();
    queue.enqueue(NewQueueItem::new("summarize")).await.unwrap();
    let item = queue.dequeue(i32::MAX, "w").await.unwrap().unwrap();

    let span = workq::telemetry::queue::start_item_span(&item);
    workq::telemetry::queue::record_state_transition(&span, "processing", "completed");
}

#[test]
fn metrics_record_without_a_provider() {
    workq::telemetry::metrics::items_enqueued("reply", 3);
    workq::telemetry::metrics::state_transition(
        workq::model::Status::Queued,
        workq::model::Status::Processing,
    );
}
