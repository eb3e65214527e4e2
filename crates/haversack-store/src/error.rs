//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during chunk store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested write target is not available: a frozen era, or a
    /// missing path. Local and retryable by the caller.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A persisted record could not be parsed.
    #[error("corrupt chunk data: {0}")]
    Corrupt(String),

    /// Message serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Background task failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
