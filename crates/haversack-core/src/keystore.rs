//! The key store capability.
//!
//! The crypto layer never owns keys; it is handed a [`KeyStore`] exposing the
//! local keypairs and the public keys of peers learned out of band. The
//! in-memory implementation supports exporting its full key material as an
//! opaque memento blob so an external caller can persist it.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SecurityError};
use crate::keys::{
    AgreementSecret, Ed25519PublicKey, SessionKey, SigningKeypair, X25519PublicKey,
};
use crate::peer::PeerId;

/// Algorithm identifier for the signing scheme.
pub const SIGNING_ALGORITHM: &str = "ed25519";

/// Algorithm identifier for the encryption scheme.
pub const ENCRYPTION_ALGORITHM: &str = "x25519+chacha20poly1305";

/// Public key material of a single peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerKeys {
    /// Key used to verify the peer's signatures.
    pub verifying: Ed25519PublicKey,
    /// Key used to encrypt session keys for the peer.
    pub agreement: X25519PublicKey,
}

/// Capability trait over key material.
///
/// Lookups for absent peers are hard failures ([`SecurityError::UnknownPeer`]);
/// the crypto layer never degrades silently.
pub trait KeyStore: Send + Sync {
    /// The identity the local keypairs belong to.
    fn owner(&self) -> &PeerId;

    /// The local signing keypair.
    fn signing_keypair(&self) -> &SigningKeypair;

    /// The local key-agreement secret.
    fn agreement_secret(&self) -> &AgreementSecret;

    /// Public key material of a known peer.
    fn keys_of(&self, peer: &PeerId) -> Result<PeerKeys>;

    /// Generate a fresh symmetric session key.
    fn generate_session_key(&self) -> SessionKey {
        SessionKey::generate()
    }

    /// Identifier of the signing algorithm in use.
    fn signing_algorithm(&self) -> &'static str {
        SIGNING_ALGORITHM
    }

    /// Identifier of the encryption algorithm in use.
    fn encryption_algorithm(&self) -> &'static str {
        ENCRYPTION_ALGORITHM
    }
}

/// In-memory key store.
///
/// Peers are registered via [`add_peer`](Self::add_peer) after an
/// out-of-band exchange of [`PeerKeys`]. The full state round-trips through
/// [`to_memento`](Self::to_memento) / [`from_memento`](Self::from_memento).
pub struct InMemoryKeyStore {
    owner: PeerId,
    signing: SigningKeypair,
    agreement: AgreementSecret,
    peers: RwLock<HashMap<PeerId, PeerKeys>>,
}

/// Serialized form of an [`InMemoryKeyStore`].
#[derive(Serialize, Deserialize)]
struct KeyStoreMemento {
    owner: PeerId,
    signing_seed: [u8; 32],
    agreement_seed: [u8; 32],
    peers: Vec<(PeerId, PeerKeys)>,
}

impl InMemoryKeyStore {
    /// Create a store with freshly generated local keypairs.
    pub fn generate(owner: PeerId) -> Self {
        Self {
            owner,
            signing: SigningKeypair::generate(),
            agreement: AgreementSecret::generate(),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a peer's public key material.
    pub fn add_peer(&self, peer: PeerId, keys: PeerKeys) {
        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer, keys);
    }

    /// The local public key material, for sharing with peers out of band.
    pub fn public_keys(&self) -> PeerKeys {
        PeerKeys {
            verifying: self.signing.public_key(),
            agreement: self.agreement.public_key(),
        }
    }

    /// Export the full key material as an opaque blob.
    pub fn to_memento(&self) -> Vec<u8> {
        let peers = self
            .peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, keys)| (id.clone(), *keys))
            .collect();
        let memento = KeyStoreMemento {
            owner: self.owner.clone(),
            signing_seed: self.signing.seed(),
            agreement_seed: self.agreement.to_bytes(),
            peers,
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&memento, &mut buf).expect("memento serialization failed");
        buf
    }

    /// Restore a store from a memento produced by [`to_memento`](Self::to_memento).
    pub fn from_memento(bytes: &[u8]) -> Result<Self> {
        let memento: KeyStoreMemento = ciborium::from_reader(bytes)
            .map_err(|e| SecurityError::MalformedPackage(e.to_string()))?;
        let store = Self {
            owner: memento.owner,
            signing: SigningKeypair::from_seed(&memento.signing_seed),
            agreement: AgreementSecret::from_bytes(memento.agreement_seed),
            peers: RwLock::new(memento.peers.into_iter().collect()),
        };
        Ok(store)
    }
}

impl KeyStore for InMemoryKeyStore {
    fn owner(&self) -> &PeerId {
        &self.owner
    }

    fn signing_keypair(&self) -> &SigningKeypair {
        &self.signing
    }

    fn agreement_secret(&self) -> &AgreementSecret {
        &self.agreement
    }

    fn keys_of(&self, peer: &PeerId) -> Result<PeerKeys> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .copied()
            .ok_or_else(|| SecurityError::UnknownPeer(peer.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_peer_is_hard_failure() {
        let store = InMemoryKeyStore::generate(PeerId::new("alice"));
        let err = store.keys_of(&PeerId::new("nobody")).unwrap_err();
        assert!(matches!(err, SecurityError::UnknownPeer(_)));
    }

    #[test]
    fn test_add_peer_then_lookup() {
        let alice = InMemoryKeyStore::generate(PeerId::new("alice"));
        let bob = InMemoryKeyStore::generate(PeerId::new("bob"));

        alice.add_peer(PeerId::new("bob"), bob.public_keys());
        let keys = alice.keys_of(&PeerId::new("bob")).unwrap();
        assert_eq!(keys, bob.public_keys());
    }

    #[test]
    fn test_memento_roundtrip() {
        let alice = InMemoryKeyStore::generate(PeerId::new("alice"));
        let bob = InMemoryKeyStore::generate(PeerId::new("bob"));
        alice.add_peer(PeerId::new("bob"), bob.public_keys());

        let blob = alice.to_memento();
        let restored = InMemoryKeyStore::from_memento(&blob).unwrap();

        assert_eq!(restored.owner(), alice.owner());
        assert_eq!(restored.public_keys(), alice.public_keys());
        assert_eq!(
            restored.keys_of(&PeerId::new("bob")).unwrap(),
            bob.public_keys()
        );
    }

    #[test]
    fn test_memento_rejects_garbage() {
        assert!(InMemoryKeyStore::from_memento(b"not a memento").is_err());
    }
}
