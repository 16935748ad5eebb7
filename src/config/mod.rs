//! Typed configuration.
//!
//! [`Config`] holds process settings read from environment variables;
//! it loads once at startup and fails fast if required vars are missing.
//! Sensitive values are wrapped in `secrecy::SecretString` to prevent log
//! leaks. [`QueueConfig`] holds the queue's own options, read from an
//! optional TOML file and then overridden by `WORKQ_*` variables.

pub mod secrets;

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub max_connections: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            max_connections: parsed_var("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(crate::db::DEFAULT_MAX_CONNECTIONS),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Queue options shared by workers and the housekeeper.
///
/// Durations are whole seconds in TOML:
///
/// ```toml
/// priority_max = 10
/// worker_id = "bot-1"
/// backoff_schedule = [5, 30, 300]
/// stale_timeout_secs = 600
/// completed_retention_secs = 604800
/// dead_retention_secs = 2592000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Highest priority number a worker will claim.
    pub priority_max: i32,
    /// Identity recorded on every claim.
    pub worker_id: String,
    pub backoff_schedule: BackoffPolicy,
    #[serde(rename = "stale_timeout_secs", with = "secs")]
    pub stale_timeout: Duration,
    #[serde(rename = "completed_retention_secs", with = "secs")]
    pub completed_retention: Duration,
    #[serde(rename = "dead_retention_secs", with = "secs")]
    pub dead_retention: Duration,
    #[serde(rename = "poll_interval_secs", with = "secs")]
    pub poll_interval: Duration,
    #[serde(rename = "housekeeping_interval_secs", with = "secs")]
    pub housekeeping_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority_max: i32::MAX,
            worker_id: default_worker_id(),
            backoff_schedule: BackoffPolicy::default(),
            stale_timeout: Duration::from_secs(10 * 60),
            completed_retention: Duration::from_secs(7 * 24 * 60 * 60),
            dead_retention: Duration::from_secs(30 * 24 * 60 * 60),
            poll_interval: Duration::from_secs(1),
            housekeeping_interval: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("invalid queue config: {e}")))?;
        cfg.validate()
    }

    /// Read a TOML file, then apply `WORKQ_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Apply `WORKQ_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = parsed_var("WORKQ_PRIORITY_MAX")? {
            self.priority_max = v;
        }
        if let Ok(v) = std::env::var("WORKQ_WORKER_ID") {
            self.worker_id = v;
        }
        if let Ok(v) = std::env::var("WORKQ_BACKOFF_SCHEDULE") {
            self.backoff_schedule = parse_schedule(&v)?;
        }
        if let Some(v) = parsed_var("WORKQ_STALE_TIMEOUT_SECS")? {
            self.stale_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parsed_var("WORKQ_COMPLETED_RETENTION_SECS")? {
            self.completed_retention = Duration::from_secs(v);
        }
        if let Some(v) = parsed_var("WORKQ_DEAD_RETENTION_SECS")? {
            self.dead_retention = Duration::from_secs(v);
        }
        if let Some(v) = parsed_var("WORKQ_POLL_INTERVAL_SECS")? {
            self.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = parsed_var("WORKQ_HOUSEKEEPING_INTERVAL_SECS")? {
            self.housekeeping_interval = Duration::from_secs(v);
        }
        self.validate()
    }

    /// Loop periods must be non-zero.
    fn validate(self) -> Result<Self> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval_secs must be at least 1".into()));
        }
        if self.housekeeping_interval.is_zero() {
            return Err(Error::Config(
                "housekeeping_interval_secs must be at least 1".into(),
            ));
        }
        Ok(self)
    }
}

/// Comma-separated seconds, e.g. "5,30,300".
fn parse_schedule(s: &str) -> Result<BackoffPolicy> {
    let secs = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u64>()
                .map_err(|_| Error::Config(format!("invalid backoff delay '{p}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(BackoffPolicy::from_secs(&secs))
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{host}-{}", std::process::id())
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for {name}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
