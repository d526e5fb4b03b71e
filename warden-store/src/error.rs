//! Error types for warden storage

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Every connection is checked out
    #[error("Connection pool exhausted: {max} connections in use")]
    PoolExhausted { max: u32 },

    /// Underlying read or write failed
    #[error("Storage I/O error: {0}")]
    StorageIo(String),

    /// Stored JSON could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row could not be mapped back into a domain type
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl StoreError {
    /// Whether the caller may retry after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::PoolExhausted { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::StorageIo(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::StorageIo(format!("pool: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(StoreError::PoolExhausted { max: 4 }.is_retryable());
        assert!(!StoreError::StorageIo("disk full".into()).is_retryable());
        assert!(!StoreError::CorruptRow("bad".into()).is_retryable());
    }

    #[test]
    fn test_from_rusqlite() {
        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::StorageIo(_)));
    }
}
