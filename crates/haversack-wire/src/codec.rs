//! Frame codec for encounter PDUs.
//!
//! Frame layout: one type tag byte, a big-endian u32 body length, then the
//! CBOR-encoded body. `EncounterEnd` has an empty body. Decoding is strict;
//! see [`WireError::ProtocolViolation`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, WireError};
use crate::pdu::{ChunkData, ChunkOffer, ChunkRequest, Pdu};

/// Largest body a frame may carry.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const TAG_OFFER: u8 = 1;
const TAG_REQUEST: u8 = 2;
const TAG_DATA: u8 = 3;
const TAG_END: u8 = 4;

fn encode_body<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| WireError::Encoding(e.to_string()))?;
    Ok(buf)
}

fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    ciborium::from_reader(body)
        .map_err(|e| WireError::ProtocolViolation(format!("bad PDU body: {e}")))
}

/// Encode a PDU into a complete frame.
pub fn encode_pdu(pdu: &Pdu) -> Result<Vec<u8>> {
    let (tag, body) = match pdu {
        Pdu::Offer(offer) => (TAG_OFFER, encode_body(offer)?),
        Pdu::Request(request) => (TAG_REQUEST, encode_body(request)?),
        Pdu::Data(data) => (TAG_DATA, encode_body(data)?),
        Pdu::End => (TAG_END, Vec::new()),
    };

    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::Encoding(format!(
            "PDU body of {} bytes exceeds frame limit",
            body.len()
        )));
    }

    let mut frame = Vec::with_capacity(5 + body.len());
    frame.push(tag);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one complete frame.
///
/// Returns the PDU and the number of bytes consumed.
pub fn decode_pdu(frame: &[u8]) -> Result<(Pdu, usize)> {
    if frame.len() < 5 {
        return Err(WireError::ProtocolViolation("truncated frame header".into()));
    }
    let tag = frame[0];
    let len = u32::from_be_bytes(
        frame[1..5]
            .try_into()
            .map_err(|_| WireError::ProtocolViolation("truncated frame header".into()))?,
    ) as usize;

    if len > MAX_FRAME_LEN {
        return Err(WireError::ProtocolViolation(format!(
            "frame length {len} exceeds limit"
        )));
    }
    let body = frame
        .get(5..5 + len)
        .ok_or_else(|| WireError::ProtocolViolation("frame body overruns input".into()))?;

    let pdu = decode_tagged(tag, body)?;
    Ok((pdu, 5 + len))
}

fn decode_tagged(tag: u8, body: &[u8]) -> Result<Pdu> {
    let pdu = match tag {
        TAG_OFFER => Pdu::Offer(decode_body::<ChunkOffer>(body)?),
        TAG_REQUEST => Pdu::Request(decode_body::<ChunkRequest>(body)?),
        TAG_DATA => Pdu::Data(decode_body::<ChunkData>(body)?),
        TAG_END => {
            if !body.is_empty() {
                return Err(WireError::ProtocolViolation(
                    "EncounterEnd carries a body".into(),
                ));
            }
            Pdu::End
        }
        other => {
            return Err(WireError::ProtocolViolation(format!(
                "unknown PDU tag {other:#04x}"
            )))
        }
    };
    // Inbound frames must respect the same size limits writers do; a peer
    // does not get to bypass them by speaking the raw framing.
    pdu.validate_limits()
        .map_err(|reason| WireError::ProtocolViolation(reason.to_string()))?;
    Ok(pdu)
}

/// Write one PDU to the stream.
pub async fn write_pdu<W: AsyncWrite + Unpin>(writer: &mut W, pdu: &Pdu) -> Result<()> {
    if let Err(reason) = pdu.validate_limits() {
        return Err(WireError::Encoding(reason.to_string()));
    }
    let frame = encode_pdu(pdu)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next PDU from the stream.
///
/// Returns `Ok(None)` on a clean EOF before a frame begins. An EOF inside a
/// frame is a protocol violation: a partially read PDU never completes
/// silently.
pub async fn read_pdu<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Pdu>> {
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(eof_is_violation)?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_FRAME_LEN {
        return Err(WireError::ProtocolViolation(format!(
            "frame length {len} exceeds limit"
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(eof_is_violation)?;

    decode_tagged(tag[0], &body).map(Some)
}

fn eof_is_violation(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::ProtocolViolation("stream ended inside a frame".into())
    } else {
        WireError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{OfferEntry, WireMessage};
    use bytes::Bytes;
    use haversack_core::{Era, PeerId};
    use proptest::prelude::*;

    fn sample_offer() -> Pdu {
        Pdu::Offer(ChunkOffer {
            sender: PeerId::new("alice"),
            offers: vec![OfferEntry {
                format: "app/test".into(),
                uri: "uri://x".into(),
                era: Era(3),
                message_count: 7,
            }],
        })
    }

    fn sample_data(payload: &[u8]) -> Pdu {
        Pdu::Data(ChunkData {
            format: "app/test".into(),
            uri: "uri://x".into(),
            era: Era::ZERO,
            messages: vec![WireMessage {
                body: Bytes::copy_from_slice(payload),
                encrypted: false,
                signature: None,
                sender: PeerId::new("alice"),
                hops: vec![PeerId::new("relay")],
            }],
        })
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let pdus = [
            sample_offer(),
            Pdu::Request(ChunkRequest {
                format: "app/test".into(),
                uri: "uri://x".into(),
                era: Era(1),
                already_have: 4,
            }),
            sample_data(b"hello"),
            sample_data(b""),
            Pdu::End,
        ];
        for pdu in &pdus {
            let frame = encode_pdu(pdu).unwrap();
            let (decoded, consumed) = decode_pdu(&frame).unwrap();
            assert_eq!(&decoded, pdu);
            assert_eq!(consumed, frame.len());
        }
    }

    #[test]
    fn test_empty_offer_roundtrip() {
        let pdu = Pdu::Offer(ChunkOffer {
            sender: PeerId::new("bob"),
            offers: vec![],
        });
        let frame = encode_pdu(&pdu).unwrap();
        assert_eq!(decode_pdu(&frame).unwrap().0, pdu);
    }

    #[test]
    fn test_unknown_tag_is_violation() {
        let frame = [0x7f, 0, 0, 0, 0];
        assert!(matches!(
            decode_pdu(&frame).unwrap_err(),
            WireError::ProtocolViolation(_)
        ));
    }

    #[test]
    fn test_oversized_length_is_violation() {
        let mut frame = vec![TAG_DATA];
        frame.extend_from_slice(&(u32::MAX).to_be_bytes());
        assert!(matches!(
            decode_pdu(&frame).unwrap_err(),
            WireError::ProtocolViolation(_)
        ));
    }

    #[test]
    fn test_end_with_body_is_violation() {
        let frame = [TAG_END, 0, 0, 0, 1, 0xaa];
        assert!(matches!(
            decode_pdu(&frame).unwrap_err(),
            WireError::ProtocolViolation(_)
        ));
    }

    #[test]
    fn test_garbage_body_is_violation() {
        let mut frame = vec![TAG_OFFER];
        frame.extend_from_slice(&3u32.to_be_bytes());
        frame.extend_from_slice(&[0xff, 0xff, 0xff]);
        assert!(matches!(
            decode_pdu(&frame).unwrap_err(),
            WireError::ProtocolViolation(_)
        ));
    }

    #[test]
    fn test_inbound_message_count_limit_is_enforced() {
        let message = WireMessage {
            body: Bytes::from_static(b"x"),
            encrypted: false,
            signature: None,
            sender: PeerId::new("alice"),
            hops: vec![],
        };
        let pdu = Pdu::Data(ChunkData {
            format: "app/test".into(),
            uri: "uri://x".into(),
            era: Era::ZERO,
            messages: vec![message; crate::pdu::limits::MAX_MESSAGES_PER_DATA + 1],
        });

        // encode_pdu itself does not gate on limits; the decoder must.
        let frame = encode_pdu(&pdu).unwrap();
        assert!(matches!(
            decode_pdu(&frame).unwrap_err(),
            WireError::ProtocolViolation(_)
        ));
    }

    #[test]
    fn test_inbound_hop_limit_is_enforced() {
        let pdu = Pdu::Data(ChunkData {
            format: "app/test".into(),
            uri: "uri://x".into(),
            era: Era::ZERO,
            messages: vec![WireMessage {
                body: Bytes::from_static(b"x"),
                encrypted: false,
                signature: None,
                sender: PeerId::new("alice"),
                hops: vec![PeerId::new("relay"); crate::pdu::limits::MAX_HOPS + 1],
            }],
        });

        let frame = encode_pdu(&pdu).unwrap();
        assert!(matches!(
            decode_pdu(&frame).unwrap_err(),
            WireError::ProtocolViolation(_)
        ));
    }

    #[test]
    fn test_near_limit_frame_roundtrips() {
        // Leave room for CBOR structure overhead under MAX_FRAME_LEN.
        let pdu = sample_data(&vec![0xabu8; MAX_FRAME_LEN - 1024]);
        let frame = encode_pdu(&pdu).unwrap();
        assert!(frame.len() <= MAX_FRAME_LEN + 5);
        let (decoded, consumed) = decode_pdu(&frame).unwrap();
        assert_eq!(decoded, pdu);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_over_limit_body_rejected_on_encode() {
        let pdu = sample_data(&vec![0xabu8; MAX_FRAME_LEN + 1]);
        assert!(matches!(
            encode_pdu(&pdu).unwrap_err(),
            WireError::Encoding(_)
        ));
    }

    #[test]
    fn test_just_over_limit_length_rejected_on_decode() {
        let mut frame = vec![TAG_DATA];
        frame.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        assert!(matches!(
            decode_pdu(&frame).unwrap_err(),
            WireError::ProtocolViolation(_)
        ));
    }

    #[tokio::test]
    async fn test_stream_read_write() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);

        write_pdu(&mut a, &sample_offer()).await.unwrap();
        write_pdu(&mut a, &Pdu::End).await.unwrap();
        drop(a);

        assert_eq!(read_pdu(&mut b).await.unwrap(), Some(sample_offer()));
        assert_eq!(read_pdu(&mut b).await.unwrap(), Some(Pdu::End));
        // Clean EOF after the writer hangs up.
        assert_eq!(read_pdu(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_violation() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);

        let frame = encode_pdu(&sample_data(b"hello")).unwrap();
        // Send only half the frame, then hang up.
        a.write_all(&frame[..frame.len() / 2]).await.unwrap();
        drop(a);

        assert!(matches!(
            read_pdu(&mut b).await.unwrap_err(),
            WireError::ProtocolViolation(_)
        ));
    }

    proptest! {
        #[test]
        fn prop_data_roundtrip(
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            era in 0u32..1000,
            already in any::<u64>(),
            encrypted in any::<bool>(),
        ) {
            let data = Pdu::Data(ChunkData {
                format: "app/test".into(),
                uri: "uri://x".into(),
                era: Era(era),
                messages: vec![WireMessage {
                    body: Bytes::from(payload),
                    encrypted,
                    signature: None,
                    sender: PeerId::new("alice"),
                    hops: vec![],
                }],
            });
            let request = Pdu::Request(ChunkRequest {
                format: "f".into(),
                uri: "u".into(),
                era: Era(era),
                already_have: already,
            });

            for pdu in [&data, &request] {
                let frame = encode_pdu(pdu).unwrap();
                let (decoded, consumed) = decode_pdu(&frame).unwrap();
                prop_assert_eq!(&decoded, pdu);
                prop_assert_eq!(consumed, frame.len());
            }
        }
    }
}
