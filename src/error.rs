//! Error types for workq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A write rejected by a store-level constraint (duplicate id, bad bounds).
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("queue item not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures the caller should treat as a storage error:
    /// retry the operation or give up on it.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Constraint(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
