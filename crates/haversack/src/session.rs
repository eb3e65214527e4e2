//! One encounter with one peer, from first byte to teardown.
//!
//! A session drives the exchange protocol over any duplex stream. Both sides
//! behave identically: announce the full local inventory in one ChunkOffer,
//! request the chunks they are behind on, serve the requests they receive,
//! and send EncounterEnd once their own inventory has arrived and no request
//! of theirs is still outstanding. The session closes when End has been both
//! sent and received, when the peer hangs up, or when the idle guard fires.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use haversack_core::p2p::{decrypt, encrypt_for, sign, verify, CryptoSettings, EncryptedPackage};
use haversack_core::{Era, KeyStore, PeerId};
use haversack_store::{ChunkStore, StoredMessage};
use haversack_wire::codec::{read_pdu, write_pdu};
use haversack_wire::pdu::{limits, ChunkData, ChunkOffer, ChunkRequest, OfferEntry, Pdu, WireMessage};

use crate::error::{EncounterError, Result};
use crate::guard::{GuardedStream, IdleGuard};
use crate::listener::ChunkDelivery;

/// How many messages have been received from a peer's chunk era, keyed by
/// `(peer, format, uri, peer's era)`.
///
/// A responder serves a chunk era in stable append order, so this count is
/// an exact read offset into that peer's copy. It is shared across sessions
/// so a later encounter resumes where the previous one stopped, and it is
/// the only thing a request offset is ever derived from: local store totals
/// mix content from several sources and several eras and say nothing about
/// any one peer's chunk.
pub(crate) type SyncProgress = Arc<Mutex<HashMap<(PeerId, String, String, Era), u64>>>;

/// Monotonic identifier for one encounter session within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Transport the stream arrived over. Informational only; the protocol is
/// identical on every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Internet,
    Bluetooth,
    Loopback,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Internet => f.write_str("internet"),
            ConnectionType::Bluetooth => f.write_str("bluetooth"),
            ConnectionType::Loopback => f.write_str("loopback"),
        }
    }
}

/// Observable lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet.
    Idle,
    /// Inventory sent, waiting for the peer's first PDU.
    Handshaking,
    /// Requests and data flowing.
    Exchanging,
    /// End handshake complete or stream abandoned; flushing and shutting down.
    Closing,
    /// Fully torn down.
    Closed,
}

pub(crate) struct Session<S> {
    pub(crate) id: SessionId,
    pub(crate) local: PeerId,
    pub(crate) store: Arc<S>,
    pub(crate) keystore: Arc<dyn KeyStore>,
    /// Default policy for chunks without a per-chunk override.
    pub(crate) settings: CryptoSettings,
    /// Per-(format, uri) policy overrides, snapshotted at session start.
    pub(crate) chunk_settings: HashMap<(String, String), CryptoSettings>,
    /// Formats worth requesting. Empty means everything.
    pub(crate) interests: HashSet<String>,
    pub(crate) delivery: mpsc::Sender<ChunkDelivery>,
    pub(crate) state: watch::Sender<SessionState>,
    /// Shared per-peer sync progress; see [`SyncProgress`].
    pub(crate) progress: SyncProgress,

    peer: Option<PeerId>,
    /// Read offset of each request currently in flight, keyed by
    /// `(format, uri, peer's era)`.
    requested: HashMap<(String, String, Era), u64>,
    inventory_received: bool,
    pending_requests: u64,
    end_sent: bool,
    end_received: bool,
}

impl<S: ChunkStore> Session<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        local: PeerId,
        store: Arc<S>,
        keystore: Arc<dyn KeyStore>,
        settings: CryptoSettings,
        chunk_settings: HashMap<(String, String), CryptoSettings>,
        interests: HashSet<String>,
        delivery: mpsc::Sender<ChunkDelivery>,
        state: watch::Sender<SessionState>,
        progress: SyncProgress,
    ) -> Self {
        Self {
            id,
            local,
            store,
            keystore,
            settings,
            chunk_settings,
            interests,
            delivery,
            state,
            progress,
            peer: None,
            requested: HashMap::new(),
            inventory_received: false,
            pending_requests: 0,
            end_sent: false,
            end_received: false,
        }
    }

    /// Drive the session to completion. Always lands in `Closed`, even on
    /// error; the stream is shut down and the guard disarmed on every path.
    pub(crate) async fn run<IO>(mut self, io: IO, guard: IdleGuard) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut stream = GuardedStream::new(io, guard.clone());

        self.set_state(SessionState::Handshaking);
        // The guard races the whole exchange, so even a stalled write is
        // abandoned once the peer stops consuming.
        let outcome = tokio::select! {
            () = guard.expired() => {
                tracing::debug!(session = %self.id, "peer went silent, abandoning encounter");
                Err(EncounterError::IdleTimeout)
            }
            outcome = self.exchange(&mut stream) => outcome,
        };

        self.set_state(SessionState::Closing);
        if let Err(error) = stream.shutdown().await {
            tracing::debug!(session = %self.id, %error, "stream shutdown failed");
        }
        guard.disarm();
        self.set_state(SessionState::Closed);
        outcome
    }

    async fn exchange<IO>(&mut self, stream: &mut GuardedStream<IO>) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.send_inventory(stream).await?;

        loop {
            let Some(pdu) = read_pdu(stream).await? else {
                tracing::debug!(session = %self.id, "peer closed the stream");
                return Ok(());
            };

            if *self.state.borrow() == SessionState::Handshaking {
                self.set_state(SessionState::Exchanging);
            }

            match pdu {
                Pdu::Offer(offer) => self.handle_offer(stream, offer).await?,
                Pdu::Request(request) => self.handle_request(stream, request).await?,
                Pdu::Data(data) => self.handle_data(stream, data).await?,
                Pdu::End => self.handle_end(stream).await?,
            }

            if self.end_sent && self.end_received {
                tracing::debug!(session = %self.id, "encounter complete");
                return Ok(());
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// The whole local inventory in one ChunkOffer. Sent unconditionally as
    /// the first PDU: even an empty offer announces our identity.
    async fn send_inventory<IO>(&mut self, stream: &mut GuardedStream<IO>) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut offers = Vec::new();
        for era in self.store.eras().await? {
            for info in self.store.list_chunks(era).await? {
                if info.message_count == 0 {
                    continue;
                }
                offers.push(OfferEntry {
                    format: info.format,
                    uri: info.uri,
                    era: info.era,
                    message_count: info.message_count,
                });
                if offers.len() == limits::MAX_OFFER_ENTRIES {
                    break;
                }
            }
            if offers.len() == limits::MAX_OFFER_ENTRIES {
                break;
            }
        }

        tracing::debug!(session = %self.id, chunks = offers.len(), "sending inventory");
        let offer = ChunkOffer {
            sender: self.local.clone(),
            offers,
        };
        write_pdu(stream, &Pdu::Offer(offer)).await?;
        Ok(())
    }

    /// The peer's inventory. Request every interesting chunk era this peer
    /// holds more of than we have pulled from it so far, then check whether
    /// we are already done.
    async fn handle_offer<IO>(
        &mut self,
        stream: &mut GuardedStream<IO>,
        offer: ChunkOffer,
    ) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        tracing::debug!(
            session = %self.id,
            peer = %offer.sender,
            chunks = offer.offers.len(),
            "received inventory"
        );
        let peer = offer.sender.clone();
        self.peer = Some(offer.sender);
        self.inventory_received = true;

        for entry in offer.offers {
            if !self.interests.is_empty() && !self.interests.contains(&entry.format) {
                continue;
            }
            let have = self.progress_for(&peer, &entry.format, &entry.uri, entry.era);
            if entry.message_count <= have {
                continue;
            }
            tracing::debug!(
                session = %self.id,
                format = %entry.format,
                uri = %entry.uri,
                era = %entry.era,
                have,
                offered = entry.message_count,
                "requesting chunk delta"
            );
            self.requested.insert(
                (entry.format.clone(), entry.uri.clone(), entry.era),
                have,
            );
            write_pdu(
                stream,
                &Pdu::Request(ChunkRequest {
                    format: entry.format,
                    uri: entry.uri,
                    era: entry.era,
                    already_have: have,
                }),
            )
            .await?;
            self.pending_requests += 1;
        }

        self.maybe_send_end(stream).await
    }

    /// Messages already pulled from this peer's copy of a chunk era.
    fn progress_for(&self, peer: &PeerId, format: &str, uri: &str, era: Era) -> u64 {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(peer.clone(), format.to_string(), uri.to_string(), era))
            .copied()
            .unwrap_or(0)
    }

    fn record_progress(&self, peer: &PeerId, format: &str, uri: &str, era: Era, received: u64) {
        let mut progress = self
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = progress
            .entry((peer.clone(), format.to_string(), uri.to_string(), era))
            .or_insert(0);
        *entry = (*entry).max(received);
    }

    /// Serve a chunk delta. Always answers with exactly one ChunkData, empty
    /// if we have nothing past the peer's offset; a follow-up request pages
    /// through anything beyond one batch.
    async fn handle_request<IO>(
        &mut self,
        stream: &mut GuardedStream<IO>,
        request: ChunkRequest,
    ) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let settings = self
            .chunk_settings
            .get(&(request.format.clone(), request.uri.clone()))
            .copied()
            .unwrap_or(self.settings);

        let mut stored = self
            .store
            .read_messages(
                &request.format,
                &request.uri,
                request.era,
                request.already_have,
            )
            .await?;
        stored.truncate(limits::MAX_MESSAGES_PER_DATA);

        let mut messages = Vec::with_capacity(stored.len());
        for record in stored {
            if record.hops.len() + 1 > limits::MAX_HOPS {
                tracing::debug!(
                    session = %self.id,
                    format = %request.format,
                    uri = %request.uri,
                    "message exceeded the hop limit, not forwarding"
                );
                continue;
            }
            messages.push(self.package(record, settings)?);
        }

        tracing::debug!(
            session = %self.id,
            format = %request.format,
            uri = %request.uri,
            era = %request.era,
            count = messages.len(),
            "serving chunk delta"
        );
        write_pdu(
            stream,
            &Pdu::Data(ChunkData {
                format: request.format,
                uri: request.uri,
                era: request.era,
                messages,
            }),
        )
        .await?;
        Ok(())
    }

    /// Wrap a stored message for the wire under the chunk's crypto policy.
    /// Signing and encryption are both point-to-point: we sign as ourselves
    /// and encrypt for the peer we are talking to, while end-to-end
    /// attribution rides in the sender and hop fields.
    fn package(&self, record: StoredMessage, settings: CryptoSettings) -> Result<WireMessage> {
        let mut hops = record.hops;
        hops.push(self.local.clone());

        let signature = if settings.must_sign {
            Some(sign(&record.payload, self.keystore.as_ref()))
        } else {
            None
        };

        let (body, encrypted) = if settings.must_encrypt {
            let peer = self.peer.as_ref().ok_or(EncounterError::Policy(
                "cannot encrypt before the peer announces its identity",
            ))?;
            let package = encrypt_for(&record.payload, peer, self.keystore.as_ref())?;
            (Bytes::from(package.to_bytes()), true)
        } else {
            (record.payload, false)
        };

        Ok(WireMessage {
            body,
            encrypted,
            signature,
            sender: record.sender,
            hops,
        })
    }

    /// Ingest a chunk delta: enforce the crypto policy, unwrap, store, and
    /// hand the payloads to the application grouped by provenance.
    async fn handle_data<IO>(
        &mut self,
        stream: &mut GuardedStream<IO>,
        data: ChunkData,
    ) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.pending_requests = self.pending_requests.saturating_sub(1);

        let settings = self
            .chunk_settings
            .get(&(data.format.clone(), data.uri.clone()))
            .copied()
            .unwrap_or(self.settings);
        let full_batch = data.messages.len() == limits::MAX_MESSAGES_PER_DATA;
        let local_era = self.store.current_era().await?;

        let key = (data.format.clone(), data.uri.clone(), data.era);
        let received = self.requested.remove(&key).unwrap_or(0) + data.messages.len() as u64;

        let mut groups: Vec<ChunkDelivery> = Vec::new();
        for message in data.messages {
            let Some(payload) = self.unwrap_message(&message, settings)? else {
                continue;
            };

            self.store
                .append_message(
                    &data.format,
                    &data.uri,
                    StoredMessage {
                        payload: payload.clone(),
                        sender: message.sender.clone(),
                        hops: message.hops.clone(),
                    },
                )
                .await?;

            match groups.last_mut() {
                Some(group) if group.sender == message.sender && group.hops == message.hops => {
                    group.messages.push(payload);
                }
                _ => groups.push(ChunkDelivery {
                    session: self.id,
                    format: data.format.clone(),
                    uri: data.uri.clone(),
                    era: local_era,
                    messages: vec![payload],
                    sender: message.sender,
                    hops: message.hops,
                }),
            }
        }

        for group in groups {
            if self.delivery.send(group).await.is_err() {
                tracing::warn!(session = %self.id, "delivery channel closed, dropping notification");
            }
        }

        // Advance the read offset into the peer's copy of this chunk era.
        // Hop-dropped messages still count: the offset is positional in the
        // responder's chunk, not a tally of what we kept.
        if let Some(peer) = self.peer.clone() {
            self.record_progress(&peer, &data.format, &data.uri, data.era, received);
        }

        // A full batch means the responder may be holding more; page onward
        // from where this batch left off.
        if full_batch {
            self.requested.insert(key, received);
            write_pdu(
                stream,
                &Pdu::Request(ChunkRequest {
                    format: data.format,
                    uri: data.uri,
                    era: data.era,
                    already_have: received,
                }),
            )
            .await?;
            self.pending_requests += 1;
        }

        self.maybe_send_end(stream).await
    }

    /// Enforce the crypto policy on one inbound message and recover its
    /// plaintext. Returns `None` for messages that are valid but unwanted
    /// (we are already on the hop list).
    fn unwrap_message(
        &self,
        message: &WireMessage,
        settings: CryptoSettings,
    ) -> Result<Option<Bytes>> {
        if settings.must_encrypt && !message.encrypted {
            return Err(EncounterError::Policy(
                "chunk requires encryption but message arrived in the clear",
            ));
        }
        if settings.must_sign && message.signature.is_none() {
            return Err(EncounterError::Policy(
                "chunk requires signatures but message arrived unsigned",
            ));
        }

        let payload: Bytes = if message.encrypted {
            let package = EncryptedPackage::from_bytes(&message.body)?;
            Bytes::from(decrypt(&package, self.keystore.as_ref())?)
        } else {
            message.body.clone()
        };

        if let Some(signature) = &message.signature {
            // Point-to-point attestation: the direct peer signed whatever it
            // forwarded, regardless of who authored it.
            let peer = self.peer.as_ref().ok_or(EncounterError::Policy(
                "signed message arrived before the peer announced its identity",
            ))?;
            if !verify(&payload, signature, peer, self.keystore.as_ref())? {
                return Err(EncounterError::InvalidSignature(peer.clone()));
            }
        }

        if message.hops.contains(&self.local) {
            tracing::debug!(
                session = %self.id,
                sender = %message.sender,
                "message already passed through us, dropping"
            );
            return Ok(None);
        }

        Ok(Some(payload))
    }

    async fn handle_end<IO>(&mut self, stream: &mut GuardedStream<IO>) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        tracing::debug!(session = %self.id, "peer is done");
        self.end_received = true;
        if !self.end_sent && self.pending_requests == 0 {
            write_pdu(stream, &Pdu::End).await?;
            self.end_sent = true;
        }
        Ok(())
    }

    /// End goes out once the peer's inventory has arrived and nothing we
    /// asked for is still in flight.
    async fn maybe_send_end<IO>(&mut self, stream: &mut GuardedStream<IO>) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if !self.end_sent && self.inventory_received && self.pending_requests == 0 {
            tracing::debug!(session = %self.id, "nothing left to exchange, sending end");
            write_pdu(stream, &Pdu::End).await?;
            self.end_sent = true;
        }
        Ok(())
    }
}
