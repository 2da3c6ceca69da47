//! Storage layer error types.

use codeintel_types::UploadState;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Upload row not found
    #[error("Upload not found: {0}")]
    NotFound(i64),

    /// Row is not in a state that allows the transition
    #[error("Cannot {operation} upload {id} in state {state}")]
    InvalidState {
        id: i64,
        state: UploadState,
        operation: &'static str,
    },

    /// A blocking storage call panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::InvalidState {
            id: 42,
            state: UploadState::Errored,
            operation: "requeue",
        };
        assert_eq!(err.to_string(), "Cannot requeue upload 42 in state errored");
        assert_eq!(StorageError::NotFound(7).to_string(), "Upload not found: 7");
    }
}
