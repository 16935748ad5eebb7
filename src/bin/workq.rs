//! workq CLI: operator interface to the queue.

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use workq::config::secrets::redacted_url;
use workq::config::{Config, QueueConfig};
use workq::db::Db;
use workq::engine::{Housekeeper, HousekeeperConfig};
use workq::model::{ItemId, NewQueueItem, QueueItem, Status};
use workq::queue::QueueStore;
use workq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "workq", about = "Persistent priority work queue")]
struct Cli {
    /// Queue options file (TOML); WORKQ_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Enqueue a new item
    Enqueue {
        /// Task type (interpreted by workers only)
        task_type: String,
        /// Priority (lower = served first)
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        channel_id: Option<String>,
        #[arg(long, default_value_t = workq::model::DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,
        /// Seconds to wait before the item becomes eligible
        #[arg(long)]
        delay_secs: Option<u64>,
        #[arg(long)]
        correlation_id: Option<String>,
        #[arg(long)]
        parent_id: Option<ItemId>,
    },
    /// Claim the next eligible item and print it
    Dequeue {
        /// Defaults to the configured priority_max
        #[arg(long)]
        priority_max: Option<i32>,
        /// Defaults to the configured worker_id
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// Mark an item completed
    Complete { id: ItemId },
    /// Report a failed attempt
    Fail { id: ItemId, error: String },
    /// Release claims older than the stale timeout
    RequeueStale {
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Delete old completed and dead items
    Purge {
        #[arg(long)]
        completed_secs: Option<u64>,
        #[arg(long)]
        dead_secs: Option<u64>,
    },
    /// Item counts per status
    Stats,
    /// Show one item
    Show { id: ItemId },
    /// List items
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<Status>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run the housekeeper until Ctrl-C
    Housekeep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let queue_config = QueueConfig::load(cli.config.as_deref())?;

    let telemetry = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workq".to_string(),
        log_level: config.log_level.clone(),
    })?;
    tracing::debug!(otlp = telemetry.is_exporting(), "telemetry initialized");

    tracing::debug!(database = %redacted_url(&config.database_url), "connecting");
    let db = Db::connect_with(config.database_url.expose_secret(), config.max_connections)
        .await?
        .with_backoff(queue_config.backoff_schedule.clone());

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::Enqueue {
            task_type,
            priority,
            payload,
            user_id,
            channel_id,
            max_attempts,
            delay_secs,
            correlation_id,
            parent_id,
        } => {
            let payload: serde_json::Value = match payload {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::json!({}),
            };

            let mut new = NewQueueItem::new(task_type)
                .priority(priority)
                .payload(payload)
                .max_attempts(max_attempts);
            if let Some(user) = user_id {
                new = new.user(user);
            }
            if let Some(channel) = channel_id {
                new = new.channel(channel);
            }
            if let Some(secs) = delay_secs {
                new = new.delay(Duration::from_secs(secs));
            }
            if let Some(correlation) = correlation_id {
                new = new.correlation(correlation);
            }
            if let Some(parent) = parent_id {
                new = new.parent(parent);
            }

            let id = db.enqueue(new).await?;
            println!("Enqueued: {id}");
            Ok(())
        }
        Command::Dequeue {
            priority_max,
            worker_id,
        } => {
            let priority_max = priority_max.unwrap_or(queue_config.priority_max);
            let worker_id = worker_id.unwrap_or(queue_config.worker_id);
            match db.dequeue(priority_max, &worker_id).await? {
                Some(item) => print_item(&item)?,
                None => println!("No eligible item."),
            }
            Ok(())
        }
        Command::Complete { id } => {
            db.complete(id).await?;
            println!("Completed: {id}");
            Ok(())
        }
        Command::Fail { id, error } => {
            db.fail(id, &error).await?;
            println!("Failure recorded: {id}");
            Ok(())
        }
        Command::RequeueStale { timeout_secs } => {
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(queue_config.stale_timeout);
            let n = db.requeue_stale(timeout).await?;
            println!("Reclaimed {n} stale item(s).");
            Ok(())
        }
        Command::Purge {
            completed_secs,
            dead_secs,
        } => {
            let completed = completed_secs
                .map(Duration::from_secs)
                .unwrap_or(queue_config.completed_retention);
            let dead = dead_secs
                .map(Duration::from_secs)
                .unwrap_or(queue_config.dead_retention);
            let purged_completed = db.purge_completed(completed).await?;
            let purged_dead = db.purge_dead(dead).await?;
            println!("Purged {purged_completed} completed, {purged_dead} dead.");
            Ok(())
        }
        Command::Stats => {
            for (status, count) in db.get_status_counts().await? {
                println!("{:<12} {count}", status.to_string());
            }
            Ok(())
        }
        Command::Show { id } => print_item(&db.get(id).await?),
        Command::List { status, limit } => cmd_list(&db, status, limit).await,
        Command::Housekeep => {
            let housekeeper = Housekeeper::new(
                Arc::new(db),
                HousekeeperConfig::from(&queue_config),
            );
            let stop = housekeeper.shutdown_handle();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                stop.notify_one();
            });
            housekeeper.run().await?;
            Ok(())
        }
    }
}

async fn cmd_list(db: &Db, status: Option<Status>, limit: usize) -> anyhow::Result<()> {
    let items = db.list(status, limit).await?;

    if items.is_empty() {
        println!("No queue items found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<10}  {:<4}  {:<7}  SCHEDULED",
        "ID", "TYPE", "STATUS", "PRI", "TRIES"
    );
    println!("{}", "-".repeat(100));

    for item in &items {
        println!(
            "{:<36}  {:<16}  {:<10}  {:<4}  {:<7}  {}",
            item.id,
            item.task_type,
            item.status,
            item.priority,
            format!("{}/{}", item.attempt_count, item.max_attempts),
            item.scheduled_for.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} item(s)", items.len());
    Ok(())
}

fn print_item(item: &QueueItem) -> anyhow::Result<()> {
    println!("ID:          {}", item.id);
    println!("Type:        {}", item.task_type);
    println!("Status:      {}", item.status);
    println!("Priority:    {}", item.priority);
    println!("Attempts:    {}/{}", item.attempt_count, item.max_attempts);
    println!("User:        {}", item.user_id.as_deref().unwrap_or("-"));
    println!("Channel:     {}", item.channel_id.as_deref().unwrap_or("-"));
    println!("Payload:     {}", serde_json::to_string_pretty(&item.payload)?);
    println!("Created:     {}", item.created_at);
    println!("Scheduled:   {}", item.scheduled_for);
    if let Some(ref worker) = item.worker_id {
        println!("Worker:      {worker}");
    }
    if let Some(started) = item.started_at {
        println!("Started:     {started}");
    }
    if let Some(done) = item.completed_at {
        println!("Resolved:    {done}");
    }
    if let Some(ref err) = item.last_error {
        println!("Last Error:  {err}");
    }
    if let Some(ref correlation) = item.correlation_id {
        println!("Correlation: {correlation}");
    }
    if let Some(parent) = item.parent_id {
        println!("Parent:      {parent}");
    }
    Ok(())
}
