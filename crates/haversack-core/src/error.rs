//! Error types for the haversack core.

use thiserror::Error;

use crate::peer::PeerId;

/// Errors raised by the point-to-point crypto layer and the key store.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// No key material is registered for the given peer.
    ///
    /// A hard failure: verification against an unknown signer or encryption
    /// for an unknown recipient is never silently skipped.
    #[error("no key material for peer {0}")]
    UnknownPeer(PeerId),

    /// Encrypting a payload or wrapping a session key failed.
    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    /// Decryption failed.
    ///
    /// Deliberately opaque: wrong recipient, corrupted package, and tampered
    /// ciphertext all surface identically.
    #[error("decryption failed")]
    DecryptFailed,

    /// A serialized package or memento could not be parsed.
    #[error("malformed package: {0}")]
    MalformedPackage(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, SecurityError>;
