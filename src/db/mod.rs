//! Database connection pool, migrations, and health check.
//!
//! [`Db`] is the Postgres-backed [`QueueStore`](crate::queue::QueueStore).
//! Queue operations live in the `queue` submodule.

mod queue;

use crate::backoff::BackoffPolicy;
use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Default pool size when the caller doesn't pick one.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Database handle. Owns the connection pool and the retry policy.
pub struct Db {
    pool: PgPool,
    backoff: BackoffPolicy,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connect with an explicit pool size.
    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Replace the retry schedule consulted by `fail`.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
