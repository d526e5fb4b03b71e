//! Error types for the trust engine

use std::time::Duration;
use thiserror::Error;

use warden_core::TrustError;
use warden_store::StoreError;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Storage layer failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Domain rule violation
    #[error("Trust error: {0}")]
    Trust(#[from] TrustError),

    /// A storage call did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A blocking or background task died
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Snapshot export failed
    #[error("Snapshot failed: {0}")]
    Snapshot(String),
}

impl EngineError {
    /// Whether callers should keep serving the last known value
    pub fn is_degraded(&self) -> bool {
        match self {
            EngineError::Timeout { .. } | EngineError::TaskFailed(_) => true,
            EngineError::Store(StoreError::StorageIo(_) | StoreError::PoolExhausted { .. }) => true,
            _ => false,
        }
    }

    /// Whether the same call may succeed after a backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(err) => err.is_retryable(),
            EngineError::Timeout { .. } => true,
            _ => false,
        }
    }
}
