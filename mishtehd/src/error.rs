//! Daemon error types.

use mishteh_ledger::LedgerError;
use mishteh_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Database connection error
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
