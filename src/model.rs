//! Core data model.
//!
//! A queue item is a unit of deferred work. The queue never interprets its
//! payload or correlation fields; it only moves the item through its
//! lifecycle: queued → processing → completed | dead (or back to queued).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Error;

/// Attempt budget applied when a producer does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Queue Item
// ---------------------------------------------------------------------------

/// A unit of deferred work as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,

    /// Lower value = served first.
    pub priority: i32,

    pub status: Status,

    /// Classifies the work for consumers. The queue doesn't interpret it.
    pub task_type: String,

    pub user_id: Option<String>,
    pub channel_id: Option<String>,

    /// The work's input, stored and returned verbatim.
    pub payload: serde_json::Value,

    /// Number of claims so far. Incremented by every dequeue.
    pub attempt_count: u32,

    /// Failure reports at or past this many attempts dead-letter the item.
    pub max_attempts: u32,

    pub last_error: Option<String>,

    /// Current claimant, set only while processing.
    pub worker_id: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Earliest time the item may be claimed.
    pub scheduled_for: DateTime<Utc>,

    /// Time of the most recent claim.
    pub started_at: Option<DateTime<Utc>>,

    /// Time the item reached `completed` or `dead`.
    pub completed_at: Option<DateTime<Utc>>,

    pub correlation_id: Option<String>,
    pub parent_id: Option<ItemId>,
}

impl QueueItem {
    /// True once the retry budget is spent.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// Newtype for queue item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(ItemId)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting for `scheduled_for` to pass and a worker to claim it.
    Queued,
    /// Claimed by a worker.
    Processing,
    /// Done. Terminal.
    Completed,
    /// Exhausted its attempts. Terminal.
    Dead,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Queued,
        Status::Processing,
        Status::Completed,
        Status::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Dead => "dead",
        }
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Dead)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Status::Queued),
            "processing" => Ok(Status::Processing),
            "completed" => Ok(Status::Completed),
            "dead" => Ok(Status::Dead),
            _ => Err(Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// When a new item first becomes eligible for claim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    Now,
    After(Duration),
    At(DateTime<Utc>),
}

/// Builder for new queue items. The producer-facing API for enqueueing work.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub(crate) id: ItemId,
    pub(crate) task_type: String,
    pub(crate) priority: i32,
    pub(crate) payload: serde_json::Value,
    pub(crate) user_id: Option<String>,
    pub(crate) channel_id: Option<String>,
    pub(crate) max_attempts: u32,
    pub(crate) schedule: Schedule,
    pub(crate) correlation_id: Option<String>,
    pub(crate) parent_id: Option<ItemId>,
}

impl NewQueueItem {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            task_type: task_type.into(),
            priority: 0,
            payload: serde_json::json!({}),
            user_id: None,
            channel_id: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            schedule: Schedule::Now,
            correlation_id: None,
            parent_id: None,
        }
    }

    /// Use a caller-chosen id instead of a fresh one.
    pub fn id(mut self, id: ItemId) -> Self {
        self.id = id;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Hold the item back for `delay` after insertion.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.schedule = Schedule::After(delay);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.schedule = Schedule::At(at);
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn parent(mut self, parent_id: ItemId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Materialize the persisted form, resolving the schedule against `now`.
    pub(crate) fn into_item(self, now: DateTime<Utc>) -> crate::error::Result<QueueItem> {
        let scheduled_for = match self.schedule {
            Schedule::Now => now,
            Schedule::After(delay) => later_by(now, delay)?,
            Schedule::At(at) => at,
        };

        Ok(QueueItem {
            id: self.id,
            priority: self.priority,
            status: Status::Queued,
            task_type: self.task_type,
            user_id: self.user_id,
            channel_id: self.channel_id,
            payload: self.payload,
            attempt_count: 0,
            max_attempts: self.max_attempts,
            last_error: None,
            worker_id: None,
            created_at: now,
            scheduled_for,
            started_at: None,
            completed_at: None,
            correlation_id: self.correlation_id,
            parent_id: self.parent_id,
        })
    }
}

/// `at + d`, or an error when the result leaves the representable range.
pub(crate) fn later_by(at: DateTime<Utc>, d: Duration) -> crate::error::Result<DateTime<Utc>> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .ok_or_else(|| out_of_range(d))
}

/// `at - d`, or an error when the result leaves the representable range.
pub(crate) fn earlier_by(at: DateTime<Utc>, d: Duration) -> crate::error::Result<DateTime<Utc>> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_sub_signed(d))
        .ok_or_else(|| out_of_range(d))
}

fn out_of_range(d: Duration) -> Error {
    Error::Other(format!("duration out of range: {}s", d.as_secs()))
}
