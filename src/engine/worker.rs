//! Worker loop: poll for claims, run a handler, report the outcome.

use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{Instrument, debug, info, warn};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::model::QueueItem;
use crate::queue::QueueStore;
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_state_transition, start_item_span};

/// Executes claimed work. An `Err` is reported to the store via `fail`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, item: &QueueItem) -> anyhow::Result<()>;
}

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Highest priority number this worker claims.
    pub priority_max: i32,
    /// Sleep between polls when the queue is empty or unreachable.
    pub poll_interval: Duration,
}

impl From<&QueueConfig> for WorkerConfig {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            worker_id: cfg.worker_id.clone(),
            priority_max: cfg.priority_max,
            poll_interval: cfg.poll_interval,
        }
    }
}

/// Polls one store and processes one item at a time.
pub struct Worker {
    store: Arc<dyn QueueStore>,
    handler: Arc<dyn Handler>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Clone for Worker {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Worker {
    pub fn new(store: Arc<dyn QueueStore>, handler: Arc<dyn Handler>, config: WorkerConfig) -> Self {
        Self {
            store,
            handler,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop after the current item.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = %self.config.worker_id, "worker started");

        loop {
            // Drain while work is available, poll otherwise. A storage error
            // is handled like an empty queue: wait and try again.
            let processed = match self.run_once().await {
                Ok(processed) => processed,
                Err(e) => {
                    warn!(worker_id = %self.config.worker_id, "worker iteration failed: {e}");
                    false
                }
            };
            if processed {
                continue;
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(worker_id = %self.config.worker_id, "worker shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Claim and process at most one item. Returns whether one was claimed.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(item) = self
            .store
            .dequeue(self.config.priority_max, &self.config.worker_id)
            .await?
        else {
            return Ok(false);
        };

        let span = start_item_span(&item);
        async {
            let started = Instant::now();
            let result = self.handler.handle(&item).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            metrics::handler_duration_ms().record(
                elapsed_ms,
                &[
                    KeyValue::new("task_type", item.task_type.clone()),
                    KeyValue::new("result", if result.is_ok() { "ok" } else { "error" }),
                ],
            );

            match result {
                Ok(()) => {
                    record_state_transition(&span, "processing", "completed");
                    debug!(id = %item.id, elapsed_ms, "handler succeeded");
                    self.store.complete(item.id).await
                }
                Err(e) => {
                    let to = if item.attempts_exhausted() { "dead" } else { "queued" };
                    record_state_transition(&span, "processing", to);
                    warn!(id = %item.id, attempt = item.attempt_count, "handler failed: {e:#}");
                    self.store.fail(item.id, &format!("{e:#}")).await
                }
            }
        }
        .instrument(span.clone())
        .await
        .inspect_err(|e| warn!(id = %item.id, "reporting outcome failed: {e}"))?;

        Ok(true)
    }
}
