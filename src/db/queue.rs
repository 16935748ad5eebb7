//! Queue store operations on Postgres.
//!
//! Claims use `FOR UPDATE SKIP LOCKED`: a row another claimer has locked is
//! skipped rather than awaited. All timestamps come from the database
//! clock so workers on different hosts agree on eligibility.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{ItemId, NewQueueItem, QueueItem, Schedule, Status};
use crate::queue::{QueueStore, STALE_EXHAUSTED_ERROR, StatusCounts, empty_counts};
use crate::telemetry::metrics;

macro_rules! columns {
    () => {
        "id, priority, status, task_type, user_id, channel_id, payload, attempt_count, \
         max_attempts, last_error, worker_id, created_at, scheduled_for, started_at, \
         completed_at, correlation_id, parent_id"
    };
}

#[async_trait]
impl QueueStore for super::Db {
    async fn enqueue(&self, item: NewQueueItem) -> Result<ItemId> {
        insert_on(&self.pool, &item).await?;

        debug!(id = %item.id, task_type = %item.task_type, "enqueued");
        metrics::items_enqueued(&item.task_type, 1);
        Ok(item.id)
    }

    async fn enqueue_batch(&self, items: Vec<NewQueueItem>) -> Result<Vec<ItemId>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        // Dropping the transaction on the first error rolls back every insert.
        let mut tx = self.pool.begin().await?;
        for item in &items {
            insert_on(&mut *tx, item).await?;
        }
        tx.commit().await?;

        for item in &items {
            metrics::items_enqueued(&item.task_type, 1);
        }
        debug!(count = items.len(), "enqueued batch");
        Ok(items.iter().map(|i| i.id).collect())
    }

    async fn dequeue(&self, priority_max: i32, worker_id: &str) -> Result<Option<QueueItem>> {
        let row: Option<QueueItemRow> = sqlx::query_as(concat!(
            "UPDATE queue_items
             SET status = 'processing', worker_id = $2, started_at = now(),
                 attempt_count = attempt_count + 1
             WHERE id = (
                 SELECT id FROM queue_items
                 WHERE status = 'queued' AND scheduled_for <= now() AND priority <= $1
                 ORDER BY priority ASC, scheduled_for ASC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING ",
            columns!()
        ))
        .bind(priority_max)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let item = row.try_into_item()?;

        debug!(id = %item.id, worker_id, attempt = item.attempt_count, "claimed");
        metrics::items_claimed(&item.task_type);
        metrics::state_transition(Status::Queued, Status::Processing);
        Ok(Some(item))
    }

    async fn complete(&self, id: ItemId) -> Result<()> {
        let prev: Option<(String,)> = sqlx::query_as(
            "WITH prev AS (
                 SELECT id, status FROM queue_items
                 WHERE id = $1 AND status IN ('queued', 'processing')
                 FOR UPDATE
             )
             UPDATE queue_items q
             SET status = 'completed', completed_at = now(), worker_id = NULL
             FROM prev
             WHERE q.id = prev.id
             RETURNING prev.status",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        match prev {
            Some((from,)) => metrics::state_transition(from.parse()?, Status::Completed),
            None => debug!(%id, "complete on missing or terminal item ignored"),
        }
        Ok(())
    }

    async fn fail(&self, id: ItemId, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, i32, i32)> = sqlx::query_as(
            "SELECT status, attempt_count, max_attempts FROM queue_items
             WHERE id = $1
             FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, attempts, max)) = current else {
            warn!(%id, "fail reported for missing item, ignoring");
            return Ok(());
        };
        if status != Status::Processing.as_str() {
            warn!(%id, %status, "fail reported for item not in processing, ignoring");
            return Ok(());
        }

        if attempts >= max {
            sqlx::query(
                "UPDATE queue_items
                 SET status = 'dead', last_error = $2, completed_at = now(), worker_id = NULL
                 WHERE id = $1",
            )
            .bind(id.0)
            .bind(error)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            info!(%id, attempts, max, error, "dead-lettered");
            metrics::state_transition(Status::Processing, Status::Dead);
        } else {
            let delay = self.backoff.delay(attempts as u32);
            sqlx::query(
                "UPDATE queue_items
                 SET status = 'queued', last_error = $2, worker_id = NULL, started_at = NULL,
                     scheduled_for = now() + make_interval(secs => $3)
                 WHERE id = $1",
            )
            .bind(id.0)
            .bind(error)
            .bind(delay.as_secs_f64())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            debug!(%id, attempt = attempts, delay_secs = delay.as_secs_f64(), error, "requeued for retry");
            metrics::state_transition(Status::Processing, Status::Queued);
        }
        Ok(())
    }

    async fn requeue_stale(&self, timeout: Duration) -> Result<u64> {
        // Exhausted items are dead-lettered instead of being requeued forever.
        let rows: Vec<(String,)> = sqlx::query_as(
            "UPDATE queue_items
             SET status = CASE WHEN attempt_count >= max_attempts THEN 'dead' ELSE 'queued' END,
                 last_error = CASE WHEN attempt_count >= max_attempts THEN $2 ELSE last_error END,
                 completed_at = CASE WHEN attempt_count >= max_attempts THEN now() ELSE NULL END,
                 started_at = CASE WHEN attempt_count >= max_attempts THEN started_at ELSE NULL END,
                 worker_id = NULL
             WHERE status = 'processing'
               AND started_at < now() - make_interval(secs => $1)
             RETURNING status",
        )
        .bind(timeout.as_secs_f64())
        .bind(STALE_EXHAUSTED_ERROR)
        .fetch_all(&self.pool)
        .await?;

        let dead = rows
            .iter()
            .filter(|(s,)| s == Status::Dead.as_str())
            .count() as u64;
        let requeued = rows.len() as u64 - dead;

        if !rows.is_empty() {
            info!(requeued, dead, "reclaimed stale items");
            metrics::items_reclaimed(Status::Queued, requeued);
            metrics::items_reclaimed(Status::Dead, dead);
        }
        Ok(rows.len() as u64)
    }

    async fn purge_completed(&self, older_than: Duration) -> Result<u64> {
        self.purge(Status::Completed, older_than).await
    }

    async fn purge_dead(&self, older_than: Duration) -> Result<u64> {
        self.purge(Status::Dead, older_than).await
    }

    async fn get_status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM queue_items GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = empty_counts();
        for (status, n) in rows {
            counts.insert(status.parse()?, n as u64);
        }
        Ok(counts)
    }

    async fn get(&self, id: ItemId) -> Result<QueueItem> {
        let row: Option<QueueItemRow> =
            sqlx::query_as(concat!("SELECT ", columns!(), " FROM queue_items WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("queue item {id}")))?
            .try_into_item()
    }

    async fn list(&self, status: Option<Status>, limit: usize) -> Result<Vec<QueueItem>> {
        let rows: Vec<QueueItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            columns!(),
            " FROM queue_items
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY priority ASC, scheduled_for ASC, created_at ASC
             LIMIT $2"
        ))
        .bind(status.map(Status::as_str))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueItemRow::try_into_item).collect()
    }
}

impl super::Db {
    async fn purge(&self, status: Status, older_than: Duration) -> Result<u64> {
        let purged = sqlx::query(
            "DELETE FROM queue_items
             WHERE status = $1 AND completed_at < now() - make_interval(secs => $2)",
        )
        .bind(status.as_str())
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if purged > 0 {
            info!(%status, purged, "purged terminal items");
            metrics::items_purged(status, purged);
        }
        Ok(purged)
    }
}

/// Insert one new item on a pool or inside a transaction.
async fn insert_on<'e, E>(executor: E, item: &NewQueueItem) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    let (at, delay_secs): (Option<DateTime<Utc>>, f64) = match item.schedule {
        Schedule::Now => (None, 0.0),
        Schedule::After(delay) => (None, delay.as_secs_f64()),
        Schedule::At(at) => (Some(at), 0.0),
    };

    sqlx::query(
        "INSERT INTO queue_items (
             id, priority, status, task_type, user_id, channel_id, payload,
             attempt_count, max_attempts, created_at, scheduled_for,
             correlation_id, parent_id
         ) VALUES (
             $1, $2, 'queued', $3, $4, $5, $6,
             0, $7, now(), COALESCE($8, now() + make_interval(secs => $9)),
             $10, $11
         )",
    )
    .bind(item.id.0)
    .bind(item.priority)
    .bind(&item.task_type)
    .bind(&item.user_id)
    .bind(&item.channel_id)
    .bind(&item.payload)
    .bind(item.max_attempts as i32)
    .bind(at)
    .bind(delay_secs)
    .bind(&item.correlation_id)
    .bind(item.parent_id.map(|p| p.0))
    .execute(executor)
    .await?;
    Ok(())
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct QueueItemRow {
    id: Uuid,
    priority: i32,
    status: String,
    task_type: String,
    user_id: Option<String>,
    channel_id: Option<String>,
    payload: serde_json::Value,
    attempt_count: i32,
    max_attempts: i32,
    last_error: Option<String>,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    scheduled_for: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    correlation_id: Option<String>,
    parent_id: Option<Uuid>,
}

impl QueueItemRow {
    fn try_into_item(self) -> Result<QueueItem> {
        Ok(QueueItem {
            id: ItemId(self.id),
            priority: self.priority,
            status: self.status.parse()?,
            task_type: self.task_type,
            user_id: self.user_id,
            channel_id: self.channel_id,
            payload: self.payload,
            attempt_count: self.attempt_count as u32,
            max_attempts: self.max_attempts as u32,
            last_error: self.last_error,
            worker_id: self.worker_id,
            created_at: self.created_at,
            scheduled_for: self.scheduled_for,
            started_at: self.started_at,
            completed_at: self.completed_at,
            correlation_id: self.correlation_id,
            parent_id: self.parent_id.map(ItemId),
        })
    }
}
