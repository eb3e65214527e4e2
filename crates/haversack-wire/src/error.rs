//! Error types for the wire module.

use thiserror::Error;

/// Errors that can occur while encoding or decoding PDUs.
#[derive(Debug, Error)]
pub enum WireError {
    /// Malformed or unexpected wire data: unknown type tag, oversized or
    /// truncated frame, undecodable body. Aborts the encounter.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// PDU serialization failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// I/O failure on the underlying stream.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
