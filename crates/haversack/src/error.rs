use haversack_core::{PeerId, SecurityError};
use haversack_store::StoreError;
use haversack_wire::WireError;
use thiserror::Error;

/// Errors surfaced while running an encounter session.
#[derive(Debug, Error)]
pub enum EncounterError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The local crypto policy rejected an inbound message.
    #[error("crypto policy violation: {0}")]
    Policy(&'static str),

    /// A signature was present but did not verify against the peer's key.
    #[error("signature verification failed for peer {0}")]
    InvalidSignature(PeerId),

    /// The peer stayed silent past the idle deadline.
    #[error("encounter idle timeout")]
    IdleTimeout,
}

pub type Result<T> = std::result::Result<T, EncounterError>;
