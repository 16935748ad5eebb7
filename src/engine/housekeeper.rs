//! Periodic housekeeping: reclaim stale claims, prune old terminal items.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::queue::QueueStore;

#[derive(Debug, Clone)]
pub struct HousekeeperConfig {
    /// Time between passes.
    pub interval: Duration,
    /// Processing age after which a claim is presumed abandoned.
    pub stale_timeout: Duration,
    pub completed_retention: Duration,
    pub dead_retention: Duration,
}

impl From<&QueueConfig> for HousekeeperConfig {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            interval: cfg.housekeeping_interval,
            stale_timeout: cfg.stale_timeout,
            completed_retention: cfg.completed_retention,
            dead_retention: cfg.dead_retention,
        }
    }
}

/// What one housekeeping pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub reclaimed: u64,
    pub purged_completed: u64,
    pub purged_dead: u64,
}

pub struct Housekeeper {
    store: Arc<dyn QueueStore>,
    config: HousekeeperConfig,
    shutdown: Arc<Notify>,
}

impl Housekeeper {
    pub fn new(store: Arc<dyn QueueStore>, config: HousekeeperConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Handle for stopping the loop from another task.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// One pass. Stops at the first storage error; the next pass retries.
    pub async fn run_once(&self) -> Result<HousekeepingReport> {
        let report = HousekeepingReport {
            reclaimed: self.store.requeue_stale(self.config.stale_timeout).await?,
            purged_completed: self
                .store
                .purge_completed(self.config.completed_retention)
                .await?,
            purged_dead: self.store.purge_dead(self.config.dead_retention).await?,
        };

        if report != HousekeepingReport::default() {
            info!(
                reclaimed = report.reclaimed,
                purged_completed = report.purged_completed,
                purged_dead = report.purged_dead,
                "housekeeping pass"
            );
        }
        Ok(report)
    }

    /// Run passes every `interval` until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        if self.config.interval.is_zero() {
            return Err(Error::Config("housekeeping interval must be non-zero".into()));
        }
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = self.config.interval.as_secs(), "housekeeper started");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("housekeeper shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("housekeeping pass failed: {e}");
                    }
                }
            }
        }
    }
}
