//! Encounter protocol PDU types.
//!
//! These are the wire messages two peers exchange during an encounter to
//! converge their chunk stores.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use haversack_core::{Era, PeerId, SignedPackage};

/// Message size limits.
pub mod limits {
    /// Max entries in a single ChunkOffer inventory.
    pub const MAX_OFFER_ENTRIES: usize = 1000;
    /// Max messages in a single ChunkData PDU.
    pub const MAX_MESSAGES_PER_DATA: usize = 100;
    /// Max hops recorded per message.
    pub const MAX_HOPS: usize = 64;
}

/// One advertised chunk in an inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferEntry {
    /// Application namespace.
    pub format: String,
    /// Resource identifier within the format.
    pub uri: String,
    /// The era the chunk lives in on the sender's side.
    pub era: Era,
    /// How many messages the sender can provide.
    pub message_count: u64,
}

/// Inventory announcement: everything the sender can provide.
///
/// Always the first PDU of a session; `sender` doubles as the peer's
/// identity announcement, which the crypto layer needs before it can seal
/// anything for the met peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOffer {
    /// Identity of the offering peer.
    pub sender: PeerId,
    /// The full inventory. May be empty.
    pub offers: Vec<OfferEntry>,
}

/// Request for the messages of a previously offered chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Application namespace.
    pub format: String,
    /// Resource identifier within the format.
    pub uri: String,
    /// The era the chunk was offered under.
    pub era: Era,
    /// Read offset into the responder's copy of the chunk era: how many of
    /// its messages the requester has already pulled. The responder serves
    /// from here in append order.
    pub already_have: u64,
}

/// One message on the wire: body, crypto envelope flags, and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// The payload; an `EncryptedPackage` in CBOR form when `encrypted`.
    pub body: Bytes,
    /// Whether `body` is sealed for the receiving peer.
    pub encrypted: bool,
    /// Detached signature of the E2E sender over the plaintext, if signed.
    /// Orthogonal to `encrypted`.
    pub signature: Option<SignedPackage>,
    /// End-to-end sender: who authored the message.
    pub sender: PeerId,
    /// Identities the message traversed so far, most recent last.
    pub hops: Vec<PeerId>,
}

/// Messages of one chunk, answering a ChunkRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkData {
    /// Application namespace.
    pub format: String,
    /// Resource identifier within the format.
    pub uri: String,
    /// The era the chunk was served from on the sender's side.
    pub era: Era,
    /// The message bodies in append order. May be empty when the responder
    /// has nothing beyond the requester's delta hint.
    pub messages: Vec<WireMessage>,
}

/// Encounter protocol data units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    /// Inventory step: announce what the sender can provide.
    Offer(ChunkOffer),
    /// Ask for a chunk's messages.
    Request(ChunkRequest),
    /// Deliver a chunk's messages.
    Data(ChunkData),
    /// Graceful termination marker: inventory served, nothing further needed.
    End,
}

impl Pdu {
    /// Check that this PDU respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            Pdu::Offer(offer) => {
                if offer.offers.len() > limits::MAX_OFFER_ENTRIES {
                    return Err("too many offer entries");
                }
            }
            Pdu::Data(data) => {
                if data.messages.len() > limits::MAX_MESSAGES_PER_DATA {
                    return Err("too many messages");
                }
                for message in &data.messages {
                    if message.hops.len() > limits::MAX_HOPS {
                        return Err("hop list too long");
                    }
                }
            }
            Pdu::Request(_) | Pdu::End => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_valid() {
        let pdu = Pdu::Offer(ChunkOffer {
            sender: PeerId::new("alice"),
            offers: vec![],
        });
        assert!(pdu.validate_limits().is_ok());
    }

    #[test]
    fn test_limits_exceeded() {
        let entry = OfferEntry {
            format: "app/test".into(),
            uri: "uri://x".into(),
            era: Era::ZERO,
            message_count: 1,
        };
        let pdu = Pdu::Offer(ChunkOffer {
            sender: PeerId::new("alice"),
            offers: vec![entry; limits::MAX_OFFER_ENTRIES + 1],
        });
        assert!(pdu.validate_limits().is_err());
    }

    #[test]
    fn test_hop_limit() {
        let message = WireMessage {
            body: Bytes::from_static(b"m"),
            encrypted: false,
            signature: None,
            sender: PeerId::new("alice"),
            hops: vec![PeerId::new("relay"); limits::MAX_HOPS + 1],
        };
        let pdu = Pdu::Data(ChunkData {
            format: "app/test".into(),
            uri: "uri://x".into(),
            era: Era::ZERO,
            messages: vec![message],
        });
        assert!(pdu.validate_limits().is_err());
    }
}
