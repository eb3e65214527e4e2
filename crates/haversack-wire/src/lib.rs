//! # Haversack Wire
//!
//! The protocol codec for encounters: PDU types and their frame encoding.
//!
//! ## Overview
//!
//! During an encounter, two peers exchange four kinds of protocol data
//! units over a raw duplex stream:
//!
//! ```text
//! Peer A                              Peer B
//!   |-------- ChunkOffer ------------->|   inventory (and identity)
//!   |<------- ChunkOffer --------------|
//!   |<------- ChunkRequest ------------|   deltas the peer wants
//!   |-------- ChunkData -------------->|   payloads + hop lists + envelopes
//!   |<------- EncounterEnd ------------|   nothing further needed
//!   |-------- EncounterEnd ----------->|
//! ```
//!
//! Framing is a one-byte type tag, a big-endian u32 length, and a CBOR
//! body. Decoding is strict: an unknown tag, an oversized length, or a
//! malformed body is a [`ProtocolViolation`](WireError::ProtocolViolation)
//! and the encounter aborts; framing corruption is unrecoverable within a
//! session.

pub mod codec;
pub mod error;
pub mod pdu;

pub use codec::{decode_pdu, encode_pdu, read_pdu, write_pdu, MAX_FRAME_LEN};
pub use error::{Result, WireError};
pub use pdu::{limits, ChunkData, ChunkOffer, ChunkRequest, OfferEntry, Pdu, WireMessage};
