//! # workq
//!
//! Persistent priority work queue.
//!
//! Producers enqueue items; workers claim them one at a time with
//! skip-locked semantics, then complete or fail them. Failures retry on a
//! backoff schedule until the item's attempts run out and it is
//! dead-lettered. A housekeeper reclaims abandoned claims and prunes old
//! terminal items. Postgres ([`db::Db`]) is the durable backend;
//! [`queue::MemoryQueue`] implements the same contract in process.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod telemetry;

pub use error::{Error, Result};
pub use model::{ItemId, NewQueueItem, QueueItem, Status};
pub use queue::QueueStore;
