//! Proptest generators for property-based testing.

use bytes::Bytes;
use proptest::prelude::*;

use haversack_core::{Era, PeerId, ERA_MODULUS};
use haversack_store::StoredMessage;
use haversack_wire::{ChunkData, ChunkOffer, ChunkRequest, OfferEntry, WireMessage};

/// Generate a plausible peer identifier.
pub fn peer_id() -> impl Strategy<Value = PeerId> {
    "[a-z][a-z0-9-]{0,31}".prop_map(PeerId::from)
}

/// Generate any representable era, including values near the wrap point.
pub fn era() -> impl Strategy<Value = Era> {
    prop_oneof![
        0u32..ERA_MODULUS,
        Just(0),
        Just(ERA_MODULUS - 1),
    ]
    .prop_map(Era::new)
}

/// Generate a chunk format tag.
pub fn format() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("text/plain".to_string()),
        Just("image/png".to_string()),
        "[a-z]{2,10}/[a-z.+-]{2,16}",
    ]
}

/// Generate a chunk URI.
pub fn uri() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ._/-]{1,64}"
}

/// Generate an opaque payload up to 4 KiB.
pub fn payload() -> impl Strategy<Value = Bytes> {
    proptest::collection::vec(any::<u8>(), 0..4096).prop_map(Bytes::from)
}

/// Generate a hop list within the wire limit.
pub fn hops() -> impl Strategy<Value = Vec<PeerId>> {
    proptest::collection::vec(peer_id(), 0..8)
}

/// Generate a stored message with arbitrary provenance.
pub fn stored_message() -> impl Strategy<Value = StoredMessage> {
    (payload(), peer_id(), hops()).prop_map(|(payload, sender, hops)| StoredMessage {
        payload,
        sender,
        hops,
    })
}

/// Generate a plaintext, unsigned wire message.
pub fn wire_message() -> impl Strategy<Value = WireMessage> {
    (payload(), peer_id(), hops()).prop_map(|(body, sender, hops)| WireMessage {
        body,
        encrypted: false,
        signature: None,
        sender,
        hops,
    })
}

/// Generate a single inventory entry.
pub fn offer_entry() -> impl Strategy<Value = OfferEntry> {
    (format(), uri(), era(), 1u64..10_000).prop_map(|(format, uri, era, message_count)| {
        OfferEntry {
            format,
            uri,
            era,
            message_count,
        }
    })
}

/// Generate a full inventory announcement.
pub fn chunk_offer() -> impl Strategy<Value = ChunkOffer> {
    (peer_id(), proptest::collection::vec(offer_entry(), 0..32))
        .prop_map(|(sender, offers)| ChunkOffer { sender, offers })
}

/// Generate a chunk delta request.
pub fn chunk_request() -> impl Strategy<Value = ChunkRequest> {
    (format(), uri(), era(), 0u64..10_000).prop_map(|(format, uri, era, already_have)| {
        ChunkRequest {
            format,
            uri,
            era,
            already_have,
        }
    })
}

/// Generate a chunk delta payload.
pub fn chunk_data() -> impl Strategy<Value = ChunkData> {
    (format(), uri(), era(), proptest::collection::vec(wire_message(), 0..16)).prop_map(
        |(format, uri, era, messages)| ChunkData {
            format,
            uri,
            era,
            messages,
        },
    )
}
