//! Point-to-point message crypto.
//!
//! Pure functions over a [`KeyStore`]: sign, verify, encrypt-for, decrypt.
//! Signing and encryption are orthogonal and combined per message according
//! to [`CryptoSettings`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SecurityError};
use crate::keys::{Ed25519Signature, EphemeralKeyPair, Nonce, SessionKey, X25519PublicKey};
use crate::keystore::KeyStore;
use crate::peer::PeerId;

/// Context string for deriving the key-encryption key from an X25519 agreement.
const KEY_WRAP_CONTEXT: &[u8] = b"session-key-wrap";

/// Per-encounter crypto requirements.
///
/// The two flags are independent; all four combinations are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CryptoSettings {
    /// Payloads must be encrypted for the met peer.
    pub must_encrypt: bool,
    /// Payloads must carry a signature of their E2E sender.
    pub must_sign: bool,
}

impl CryptoSettings {
    /// No signing, no encryption.
    pub const PLAIN: Self = Self {
        must_encrypt: false,
        must_sign: false,
    };

    /// Signed but not encrypted.
    pub const SIGNED: Self = Self {
        must_encrypt: false,
        must_sign: true,
    };

    /// Encrypted but not signed.
    pub const ENCRYPTED: Self = Self {
        must_encrypt: true,
        must_sign: false,
    };

    /// Signed and encrypted.
    pub const SIGNED_ENCRYPTED: Self = Self {
        must_encrypt: true,
        must_sign: true,
    };
}

/// A detached signature over a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPackage {
    /// Claimed identity of the signer.
    pub signer: PeerId,
    /// Signature over the plaintext payload.
    pub signature: Ed25519Signature,
}

/// A self-contained encrypted message unit.
///
/// The payload is sealed under a session key generated fresh for this one
/// message; the session key travels wrapped under an ephemeral X25519
/// agreement with the recipient's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPackage {
    /// Who can open this package.
    pub recipient: PeerId,
    /// Ephemeral agreement public key of the sender.
    pub ephemeral: X25519PublicKey,
    /// Nonce for the wrapped session key.
    pub key_nonce: Nonce,
    /// The session key, AEAD-sealed under the derived wrap key.
    pub wrapped_key: Bytes,
    /// Nonce for the payload ciphertext.
    pub payload_nonce: Nonce,
    /// The payload, AEAD-sealed under the session key.
    pub ciphertext: Bytes,
}

impl EncryptedPackage {
    /// Serialize to CBOR bytes for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization failed");
        buf
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| SecurityError::MalformedPackage(e.to_string()))
    }
}

/// Sign a payload with the local signing key.
pub fn sign(payload: &[u8], keystore: &dyn KeyStore) -> SignedPackage {
    SignedPackage {
        signer: keystore.owner().clone(),
        signature: keystore.signing_keypair().sign(payload),
    }
}

/// Verify a payload against a signature package.
///
/// Fails hard with [`SecurityError::UnknownPeer`] when the claimed signer has
/// no registered key; returns `Ok(false)` for a present key and an invalid
/// signature. The two outcomes are never conflated.
pub fn verify(
    payload: &[u8],
    package: &SignedPackage,
    claimed_signer: &PeerId,
    keystore: &dyn KeyStore,
) -> Result<bool> {
    if &package.signer != claimed_signer {
        return Ok(false);
    }
    let keys = keystore.keys_of(claimed_signer)?;
    keys.verifying.verify(payload, &package.signature)
}

/// Encrypt a payload for a recipient.
///
/// Generates a fresh session key per message (never reused), seals the
/// payload under it, and wraps the session key for the recipient.
pub fn encrypt_for(
    payload: &[u8],
    recipient: &PeerId,
    keystore: &dyn KeyStore,
) -> Result<EncryptedPackage> {
    let recipient_keys = keystore.keys_of(recipient)?;

    let session_key = keystore.generate_session_key();
    let payload_nonce = Nonce::generate();
    let ciphertext = session_key.encrypt(payload, &payload_nonce)?;

    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();
    let wrap_key = ephemeral
        .diffie_hellman(&recipient_keys.agreement)
        .derive_key(KEY_WRAP_CONTEXT);
    let key_nonce = Nonce::generate();
    let wrapped_key = wrap_key.encrypt(session_key.as_bytes(), &key_nonce)?;

    Ok(EncryptedPackage {
        recipient: recipient.clone(),
        ephemeral: ephemeral_public,
        key_nonce,
        wrapped_key: Bytes::from(wrapped_key),
        payload_nonce,
        ciphertext: Bytes::from(ciphertext),
    })
}

/// Open an encrypted package with the local agreement secret.
///
/// Wrong recipient, corrupted package, and tampered ciphertext all collapse
/// into the opaque [`SecurityError::DecryptFailed`].
pub fn decrypt(package: &EncryptedPackage, keystore: &dyn KeyStore) -> Result<Vec<u8>> {
    if &package.recipient != keystore.owner() {
        return Err(SecurityError::DecryptFailed);
    }

    let wrap_key = keystore
        .agreement_secret()
        .diffie_hellman(&package.ephemeral)
        .derive_key(KEY_WRAP_CONTEXT);
    let key_bytes = wrap_key.decrypt(&package.wrapped_key, &package.key_nonce)?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| SecurityError::DecryptFailed)?;

    SessionKey::from_bytes(key_bytes).decrypt(&package.ciphertext, &package.payload_nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::InMemoryKeyStore;

    fn paired_stores() -> (InMemoryKeyStore, InMemoryKeyStore) {
        let alice = InMemoryKeyStore::generate(PeerId::new("alice"));
        let bob = InMemoryKeyStore::generate(PeerId::new("bob"));
        alice.add_peer(PeerId::new("bob"), bob.public_keys());
        bob.add_peer(PeerId::new("alice"), alice.public_keys());
        (alice, bob)
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let (alice, bob) = paired_stores();
        let payload = b"attested payload";

        let package = sign(payload, &alice);
        assert!(verify(payload, &package, &PeerId::new("alice"), &bob).unwrap());
        assert!(!verify(b"tampered", &package, &PeerId::new("alice"), &bob).unwrap());
    }

    #[test]
    fn test_verify_unknown_signer_errors() {
        let alice = InMemoryKeyStore::generate(PeerId::new("alice"));
        let bob = InMemoryKeyStore::generate(PeerId::new("bob"));
        let package = sign(b"payload", &alice);

        // Bob never registered Alice's keys: hard failure, not a false result.
        let err = verify(b"payload", &package, &PeerId::new("alice"), &bob).unwrap_err();
        assert!(matches!(err, SecurityError::UnknownPeer(_)));
    }

    #[test]
    fn test_verify_mismatched_claim_is_invalid() {
        let (alice, bob) = paired_stores();
        let package = sign(b"payload", &alice);
        // Claim doesn't match the package's signer field.
        assert!(!verify(b"payload", &package, &PeerId::new("bob"), &bob).unwrap());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let (alice, bob) = paired_stores();

        let package = encrypt_for(b"for bob only", &PeerId::new("bob"), &alice).unwrap();
        assert_eq!(decrypt(&package, &bob).unwrap(), b"for bob only");
    }

    #[test]
    fn test_fresh_session_key_per_message() {
        let (alice, _bob) = paired_stores();

        let p1 = encrypt_for(b"same payload", &PeerId::new("bob"), &alice).unwrap();
        let p2 = encrypt_for(b"same payload", &PeerId::new("bob"), &alice).unwrap();
        assert_ne!(p1.wrapped_key, p2.wrapped_key);
        assert_ne!(p1.ciphertext, p2.ciphertext);
    }

    #[test]
    fn test_decrypt_wrong_recipient_is_opaque() {
        let (alice, bob) = paired_stores();
        let carol = InMemoryKeyStore::generate(PeerId::new("carol"));

        let package = encrypt_for(b"secret", &PeerId::new("bob"), &alice).unwrap();
        assert!(matches!(
            decrypt(&package, &carol).unwrap_err(),
            SecurityError::DecryptFailed
        ));
        // Sanity: the intended recipient still can.
        assert_eq!(decrypt(&package, &bob).unwrap(), b"secret");
    }

    #[test]
    fn test_decrypt_tampered_ciphertext_is_opaque() {
        let (alice, bob) = paired_stores();

        let mut package = encrypt_for(b"secret", &PeerId::new("bob"), &alice).unwrap();
        let mut tampered = package.ciphertext.to_vec();
        tampered[0] ^= 0xff;
        package.ciphertext = Bytes::from(tampered);

        assert!(matches!(
            decrypt(&package, &bob).unwrap_err(),
            SecurityError::DecryptFailed
        ));
    }

    #[test]
    fn test_package_serialization_roundtrip() {
        let (alice, _bob) = paired_stores();
        let package = encrypt_for(b"wire unit", &PeerId::new("bob"), &alice).unwrap();

        let bytes = package.to_bytes();
        assert_eq!(EncryptedPackage::from_bytes(&bytes).unwrap(), package);
    }
}
