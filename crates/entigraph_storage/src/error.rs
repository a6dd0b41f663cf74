//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Attempted to remove a key that is not present.
    #[error("key '{key}' not found in storage")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persisted storage image could not be read back.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Creates a key-not-found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }
}
