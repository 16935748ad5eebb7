//! The queue store contract.
//!
//! Every operation is one statement or one transaction against the backing
//! store. No in-process lock is held across an await, and the store never
//! retries its own calls: storage errors go straight back to the caller.

pub mod memory;

pub use memory::MemoryQueue;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::model::{ItemId, NewQueueItem, QueueItem, Status};

/// Count of items per status. Every status is present, zero-filled.
pub type StatusCounts = BTreeMap<Status, u64>;

/// `last_error` recorded when stale reclamation dead-letters an item.
pub const STALE_EXHAUSTED_ERROR: &str = "stale claim reclaimed after exhausting attempts";

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert one new item in `queued`. Returns its id.
    async fn enqueue(&self, item: NewQueueItem) -> Result<ItemId>;

    /// Insert all items in one transaction, or none of them.
    /// Ids come back in input order; an empty batch touches nothing.
    async fn enqueue_batch(&self, items: Vec<NewQueueItem>) -> Result<Vec<ItemId>>;

    /// Claim the most urgent eligible item with `priority <= priority_max`.
    ///
    /// Rows another claimer is evaluating are skipped, never waited on.
    async fn dequeue(&self, priority_max: i32, worker_id: &str) -> Result<Option<QueueItem>>;

    /// Mark an item completed. Missing or already-terminal ids are a no-op.
    async fn complete(&self, id: ItemId) -> Result<()>;

    /// Report a failed attempt: re-queue with backoff, or dead-letter once
    /// attempts are exhausted. Missing ids and items no longer processing
    /// are a logged no-op.
    async fn fail(&self, id: ItemId, error: &str) -> Result<()>;

    /// Release claims older than `timeout`. Returns how many items left
    /// `processing`.
    async fn requeue_stale(&self, timeout: Duration) -> Result<u64>;

    /// Delete completed items resolved more than `older_than` ago.
    async fn purge_completed(&self, older_than: Duration) -> Result<u64>;

    /// Delete dead items resolved more than `older_than` ago.
    async fn purge_dead(&self, older_than: Duration) -> Result<u64>;

    async fn get_status_counts(&self) -> Result<StatusCounts>;

    /// Fetch one item. Fails with `NotFound` when missing.
    async fn get(&self, id: ItemId) -> Result<QueueItem>;

    /// Items in `status` (or all), most urgent first.
    async fn list(&self, status: Option<Status>, limit: usize) -> Result<Vec<QueueItem>>;
}

/// Start from a map with every status at zero.
pub(crate) fn empty_counts() -> StatusCounts {
    Status::ALL.into_iter().map(|s| (s, 0)).collect()
}
