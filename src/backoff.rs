//! Retry backoff policy.
//!
//! A fixed, front-loaded schedule of delays: fast first retry, slower ones
//! after. Attempts past the end of the schedule reuse the last delay.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Default schedule: 5s, 30s, 5m.
pub const DEFAULT_SCHEDULE_SECS: [u64; 3] = [5, 30, 300];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    schedule: Vec<Duration>,
}

impl BackoffPolicy {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// Delay before the next claim after a failure on `attempt_count`.
    ///
    /// `attempt_count` is 1-based as recorded by dequeue: attempt 1 maps to
    /// the first entry. An empty schedule retries immediately.
    pub fn delay(&self, attempt_count: u32) -> Duration {
        let Some(last) = self.schedule.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let idx = (attempt_count.saturating_sub(1) as usize).min(last);
        self.schedule[idx]
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_SCHEDULE_SECS)
    }
}

// Serialized as a list of whole seconds, e.g. `[5, 30, 300]`.
impl Serialize for BackoffPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let secs: Vec<u64> = self.schedule.iter().map(Duration::as_secs).collect();
        secs.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BackoffPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let secs = Vec::<u64>::deserialize(deserializer)?;
        Ok(Self::from_secs(&secs))
    }
}
