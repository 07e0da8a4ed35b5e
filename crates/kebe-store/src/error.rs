//! Error types for the store crate.

use thiserror::Error;

/// Errors that can occur during repository and blob operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Column encoding/decoding error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A row that the operation depends on does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    #[error("blob not found: {bucket}/{key}")]
    BlobNotFound { bucket: String, key: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    /// Transient failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Io(_) | StoreError::TaskFailed(_) => true,
            _ => false,
        }
    }

    pub(crate) fn poisoned(e: impl std::fmt::Display) -> Self {
        StoreError::LockPoisoned(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let busy = StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_retryable());
        assert!(StoreError::TaskFailed("join".into()).is_retryable());
        assert!(!StoreError::NotFound("snap".into()).is_retryable());
        assert!(!StoreError::AlreadyExists("name".into()).is_retryable());
    }
}
