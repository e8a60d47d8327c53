//! Unified error type for the data layer
//!
//! One taxonomy shared across PostgreSQL, TimescaleDB, and the callers built
//! on them. Retriability is a property of the error, not the call site:
//! handlers ask `is_transient()` instead of matching backend internals.

use thiserror::Error;

/// Unified error type for data layer operations
#[derive(Error, Debug)]
pub enum DataError {
    /// Underlying PostgreSQL/TimescaleDB driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// Persistence or cache endpoint unreachable; retriable at the handler
    /// boundary
    #[error("transport error: {0}")]
    Transport(String),

    /// Entity missing for an identity-scoped read; never retried
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// Bad input; never retried
    #[error("validation error: {0}")]
    Validation(String),

    /// Upsert raced a concurrent writer; the resolved row wins
    #[error("conflict: {0}")]
    Conflict(String),

    /// Job-level deadline exceeded; maps to a failed execution with retry
    /// credit
    #[error("Job timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Cooperative cancellation; terminal, not retried
    #[error("cancelled")]
    Cancelled,

    /// Configuration problem detected at runtime
    #[error("configuration error: {0}")]
    Config(String),
}

impl DataError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Check if this is a connection-related error that might be transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Postgres(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }

    /// Short class tag used in failure metrics
    pub fn class(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Transport(_) => "transport",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
        }
    }
}

impl From<sqlx::Error> for DataError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound { entity: "row" },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Transport(e.to_string())
            }
            sqlx::Error::Io(io) => Self::Transport(io.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.to_string())
            }
            other => Self::Postgres(other),
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("serialization: {}", e))
    }
}
