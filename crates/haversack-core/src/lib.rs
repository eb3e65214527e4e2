//! # Haversack Core
//!
//! Pure primitives for the haversack engine: peer identities, storage eras,
//! key material, and the point-to-point crypto layer.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over identities and cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`PeerId`] - Application-scoped identity of a peer
//! - [`Era`] - Time-bounded storage epoch tag
//! - [`KeyStore`] - Capability trait over local and remote key material
//! - [`SignedPackage`] / [`EncryptedPackage`] - Self-contained crypto wire units
//!
//! ## Point-to-point crypto
//!
//! [`sign`], [`verify`], [`encrypt_for`] and [`decrypt`] are pure functions
//! over a [`KeyStore`]. Signing and encryption are orthogonal; see
//! [`CryptoSettings`].

pub mod era;
pub mod error;
pub mod keys;
pub mod keystore;
pub mod p2p;
pub mod peer;

pub use era::{Era, ERA_MODULUS};
pub use error::{Result, SecurityError};
pub use keys::{
    AgreementSecret, Ed25519PublicKey, Ed25519Signature, EphemeralKeyPair, Nonce, SessionKey,
    SharedKey, SigningKeypair, X25519PublicKey,
};
pub use keystore::{
    InMemoryKeyStore, KeyStore, PeerKeys, ENCRYPTION_ALGORITHM, SIGNING_ALGORITHM,
};
pub use p2p::{decrypt, encrypt_for, sign, verify, CryptoSettings, EncryptedPackage, SignedPackage};
pub use peer::PeerId;
