//! In-process queue store.
//!
//! Holds all items behind one arbiter lock. Every operation takes the lock,
//! does its selection and mutation, and releases it before returning, so a
//! claim is atomic with respect to other claimers and no caller ever waits
//! on another caller's in-flight I/O. Used by tests and by embedders that
//! don't need durability.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{QueueStore, STALE_EXHAUSTED_ERROR, StatusCounts, empty_counts};
use crate::backoff::BackoffPolicy;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{ItemId, NewQueueItem, QueueItem, Status, earlier_by, later_by};
use crate::telemetry::metrics;

pub struct MemoryQueue {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
}

#[derive(Default)]
struct Inner {
    rows: HashMap<ItemId, Row>,
    /// Insertion counter, the final FIFO tie-breaker.
    next_seq: u64,
}

struct Row {
    seq: u64,
    item: QueueItem,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock: Arc::new(SystemClock),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Other("memory queue lock poisoned".to_string()))
    }

    fn purge(&self, status: Status, older_than: Duration) -> Result<u64> {
        let cutoff = earlier_by(self.clock.now(), older_than)?;
        let mut inner = self.lock()?;
        let before = inner.rows.len();
        inner.rows.retain(|_, row| {
            !(row.item.status == status && row.item.completed_at.is_some_and(|at| at < cutoff))
        });
        let purged = (before - inner.rows.len()) as u64;
        drop(inner);

        if purged > 0 {
            info!(%status, purged, "purged terminal items");
            metrics::items_purged(status, purged);
        }
        Ok(purged)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn insert(&mut self, item: QueueItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rows.insert(item.id, Row { seq, item });
    }
}

/// Mirror of the table's constraints: unique id, at least one attempt.
fn check_insertable(item: &QueueItem, taken: impl Fn(&ItemId) -> bool) -> Result<()> {
    if item.max_attempts < 1 {
        return Err(Error::Constraint(format!(
            "item {}: max_attempts must be at least 1",
            item.id
        )));
    }
    if taken(&item.id) {
        return Err(Error::Constraint(format!("duplicate item id {}", item.id)));
    }
    Ok(())
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn enqueue(&self, new: NewQueueItem) -> Result<ItemId> {
        let item = new.into_item(self.clock.now())?;
        let (id, task_type) = (item.id, item.task_type.clone());

        let mut inner = self.lock()?;
        check_insertable(&item, |id| inner.rows.contains_key(id))?;
        inner.insert(item);
        drop(inner);

        debug!(%id, %task_type, "enqueued");
        metrics::items_enqueued(&task_type, 1);
        Ok(id)
    }

    async fn enqueue_batch(&self, items: Vec<NewQueueItem>) -> Result<Vec<ItemId>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let items = items
            .into_iter()
            .map(|n| n.into_item(now))
            .collect::<Result<Vec<_>>>()?;

        let mut inner = self.lock()?;
        // Validate everything before the first insert: all or nothing.
        let mut batch_ids = HashSet::with_capacity(items.len());
        for item in &items {
            check_insertable(item, |id| {
                inner.rows.contains_key(id) || batch_ids.contains(id)
            })?;
            batch_ids.insert(item.id);
        }

        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        for item in items {
            metrics::items_enqueued(&item.task_type, 1);
            inner.insert(item);
        }
        drop(inner);

        debug!(count = ids.len(), "enqueued batch");
        Ok(ids)
    }

    async fn dequeue(&self, priority_max: i32, worker_id: &str) -> Result<Option<QueueItem>> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let Some(row) = inner
            .rows
            .values_mut()
            .filter(|r| {
                r.item.status == Status::Queued
                    && r.item.scheduled_for <= now
                    && r.item.priority <= priority_max
            })
            .min_by_key(|r| (r.item.priority, r.item.scheduled_for, r.seq))
        else {
            return Ok(None);
        };

        let item = &mut row.item;
        item.status = Status::Processing;
        item.worker_id = Some(worker_id.to_string());
        item.started_at = Some(now);
        item.attempt_count += 1;
        let claimed = item.clone();
        drop(inner);

        debug!(id = %claimed.id, worker_id, attempt = claimed.attempt_count, "claimed");
        metrics::items_claimed(&claimed.task_type);
        metrics::state_transition(Status::Queued, Status::Processing);
        Ok(Some(claimed))
    }

    async fn complete(&self, id: ItemId) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let Some(row) = inner.rows.get_mut(&id) else {
            debug!(%id, "complete on missing item ignored");
            return Ok(());
        };
        let item = &mut row.item;
        if item.status.is_terminal() {
            debug!(%id, status = %item.status, "complete on terminal item ignored");
            return Ok(());
        }

        let from = item.status;
        item.status = Status::Completed;
        item.completed_at = Some(now);
        item.worker_id = None;
        drop(inner);

        metrics::state_transition(from, Status::Completed);
        Ok(())
    }

    async fn fail(&self, id: ItemId, error: &str) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.lock()?;

        let Some(row) = inner.rows.get_mut(&id) else {
            warn!(%id, "fail reported for missing item, ignoring");
            return Ok(());
        };
        let item = &mut row.item;
        if item.status != Status::Processing {
            warn!(%id, status = %item.status, "fail reported for item not in processing, ignoring");
            return Ok(());
        }

        // Resolve the retry time before touching the item so an error leaves
        // it unchanged.
        let exhausted = item.attempts_exhausted();
        let delay = self.backoff.delay(item.attempt_count);
        let retry_at = if exhausted { None } else { Some(later_by(now, delay)?) };

        item.last_error = Some(error.to_string());
        item.worker_id = None;

        if let Some(retry_at) = retry_at {
            item.status = Status::Queued;
            item.started_at = None;
            item.scheduled_for = retry_at;
            let attempt = item.attempt_count;
            drop(inner);

            debug!(%id, attempt, delay_secs = delay.as_secs_f64(), error, "requeued for retry");
            metrics::state_transition(Status::Processing, Status::Queued);
        } else {
            item.status = Status::Dead;
            item.completed_at = Some(now);
            let (attempts, max) = (item.attempt_count, item.max_attempts);
            drop(inner);

            info!(%id, attempts, max, error, "dead-lettered");
            metrics::state_transition(Status::Processing, Status::Dead);
        }
        Ok(())
    }

    async fn requeue_stale(&self, timeout: Duration) -> Result<u64> {
        let now = self.clock.now();
        let cutoff = earlier_by(now, timeout)?;
        let mut inner = self.lock()?;

        let (mut requeued, mut dead) = (0u64, 0u64);
        for row in inner.rows.values_mut() {
            let item = &mut row.item;
            let stale = item.status == Status::Processing
                && item.started_at.is_some_and(|at| at < cutoff);
            if !stale {
                continue;
            }

            item.worker_id = None;
            if item.attempts_exhausted() {
                item.status = Status::Dead;
                item.last_error = Some(STALE_EXHAUSTED_ERROR.to_string());
                item.completed_at = Some(now);
                dead += 1;
            } else {
                item.status = Status::Queued;
                item.started_at = None;
                requeued += 1;
            }
        }
        drop(inner);

        if requeued + dead > 0 {
            info!(requeued, dead, "reclaimed stale items");
            metrics::items_reclaimed(Status::Queued, requeued);
            metrics::items_reclaimed(Status::Dead, dead);
        }
        Ok(requeued + dead)
    }

    async fn purge_completed(&self, older_than: Duration) -> Result<u64> {
        self.purge(Status::Completed, older_than)
    }

    async fn purge_dead(&self, older_than: Duration) -> Result<u64> {
        self.purge(Status::Dead, older_than)
    }

    async fn get_status_counts(&self) -> Result<StatusCounts> {
        let inner = self.lock()?;
        let mut counts = empty_counts();
        for row in inner.rows.values() {
            *counts.entry(row.item.status).or_default() += 1;
        }
        Ok(counts)
    }

    async fn get(&self, id: ItemId) -> Result<QueueItem> {
        self.lock()?
            .rows
            .get(&id)
            .map(|row| row.item.clone())
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))
    }

    async fn list(&self, status: Option<Status>, limit: usize) -> Result<Vec<QueueItem>> {
        let inner = self.lock()?;
        let mut rows: Vec<&Row> = inner
            .rows
            .values()
            .filter(|r| status.is_none_or(|s| r.item.status == s))
            .collect();
        rows.sort_by_key(|r| (r.item.priority, r.item.scheduled_for, r.seq));
        Ok(rows.into_iter().take(limit).map(|r| r.item.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn queue_with_clock() -> (MemoryQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let queue = MemoryQueue::new().with_clock(clock.clone());
        (queue, clock)
    }

    #[tokio::test]
    async fn equal_priority_is_fifo_by_insertion() {
        let (queue, _clock) = queue_with_clock();
        let a = queue.enqueue(NewQueueItem::new("t")).await.unwrap();
        let b = queue.enqueue(NewQueueItem::new("t")).await.unwrap();

        assert_eq!(queue.dequeue(i32::MAX, "w").await.unwrap().unwrap().id, a);
        assert_eq!(queue.dequeue(i32::MAX, "w").await.unwrap().unwrap().id, b);
    }

    #[tokio::test]
    async fn earlier_scheduled_for_wins_within_priority() {
        let (queue, clock) = queue_with_clock();
        let later = queue
            .enqueue(NewQueueItem::new("t").scheduled_for(clock.now()))
            .await
            .unwrap();
        let earlier = queue
            .enqueue(
                NewQueueItem::new("t").scheduled_for(clock.now() - chrono::Duration::seconds(10)),
            )
            .await
            .unwrap();

        assert_eq!(queue.dequeue(0, "w").await.unwrap().unwrap().id, earlier);
        assert_eq!(queue.dequeue(0, "w").await.unwrap().unwrap().id, later);
    }

    #[tokio::test]
    async fn claim_sets_worker_and_start_time() {
        let (queue, clock) = queue_with_clock();
        queue
            .enqueue(NewQueueItem::new("reply").payload(json!({"n": 1})))
            .await
            .unwrap();

        let item = queue.dequeue(0, "worker-7").await.unwrap().unwrap();
        assert_eq!(item.status, Status::Processing);
        assert_eq!(item.worker_id.as_deref(), Some("worker-7"));
        assert_eq!(item.started_at, Some(clock.now()));
        assert_eq!(item.attempt_count, 1);
        assert_eq!(item.payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn retry_clears_claim_and_records_error() {
        let (queue, clock) = queue_with_clock();
        let id = queue.enqueue(NewQueueItem::new("t")).await.unwrap();
        queue.dequeue(0, "w").await.unwrap().unwrap();

        queue.fail(id, "boom").await.unwrap();

        let item = queue.get(id).await.unwrap();
        assert_eq!(item.status, Status::Queued);
        assert_eq!(item.last_error.as_deref(), Some("boom"));
        assert!(item.worker_id.is_none());
        assert!(item.started_at.is_none());
        assert_eq!(item.scheduled_for, clock.now() + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn fail_on_queued_item_is_ignored() {
        let (queue, _clock) = queue_with_clock();
        let id = queue.enqueue(NewQueueItem::new("t")).await.unwrap();

        queue.fail(id, "late report").await.unwrap();

        let item = queue.get(id).await.unwrap();
        assert_eq!(item.status, Status::Queued);
        assert!(item.last_error.is_none());
    }

    #[tokio::test]
    async fn complete_after_dead_keeps_item_dead() {
        let (queue, _clock) = queue_with_clock();
        let id = queue
            .enqueue(NewQueueItem::new("t").max_attempts(1))
            .await
            .unwrap();
        queue.dequeue(0, "w").await.unwrap().unwrap();
        queue.fail(id, "fatal").await.unwrap();

        queue.complete(id).await.unwrap();
        assert_eq!(queue.get(id).await.unwrap().status, Status::Dead);
    }

    #[tokio::test]
    async fn zero_max_attempts_is_rejected() {
        let (queue, _clock) = queue_with_clock();
        let err = queue
            .enqueue(NewQueueItem::new("t").max_attempts(0))
            .await
            .unwrap_err();
        assert!(err.is_storage(), "expected storage-class error, got {err:?}");
    }

    #[tokio::test]
    async fn list_filters_by_status_and_orders_by_priority() {
        let (queue, _clock) = queue_with_clock();
        queue.enqueue(NewQueueItem::new("t").priority(5)).await.unwrap();
        queue.enqueue(NewQueueItem::new("t").priority(1)).await.unwrap();
        queue.enqueue(NewQueueItem::new("t").priority(3)).await.unwrap();
        queue.dequeue(1, "w").await.unwrap().unwrap();

        let queued = queue.list(Some(Status::Queued), 10).await.unwrap();
        let priorities: Vec<i32> = queued.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![3, 5]);
        assert_eq!(queue.list(None, 2).await.unwrap().len(), 2);
    }
}
