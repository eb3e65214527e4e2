//! ChunkStore trait: the abstract interface for chunk persistence.
//!
//! This trait allows the encounter engine to be storage-agnostic.
//! Implementations include the filesystem layout (primary) and in-memory
//! (for tests). The store is shared by all concurrent encounter sessions.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use haversack_core::{Era, PeerId};

use crate::error::Result;

/// One message inside a chunk: an opaque payload plus relay provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// The application payload. Opaque to the engine.
    pub payload: Bytes,
    /// End-to-end sender: the identity that originally authored the message,
    /// distinct from whichever peer relayed it last.
    pub sender: PeerId,
    /// Identities the message traversed before reaching this store, in order.
    pub hops: Vec<PeerId>,
}

impl StoredMessage {
    /// A locally authored message: empty hop list, local sender.
    pub fn local(payload: impl Into<Bytes>, sender: PeerId) -> Self {
        Self {
            payload: payload.into(),
            sender,
            hops: Vec::new(),
        }
    }
}

/// Identity and size of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Application namespace (a MIME-like tag).
    pub format: String,
    /// Resource identifier within the format.
    pub uri: String,
    /// The era the chunk lives in. A chunk's identity never changes.
    pub era: Era,
    /// Number of messages appended so far.
    pub message_count: u64,
}

/// The chunk store: async interface for era-partitioned chunk persistence.
///
/// # Design Notes
///
/// - **Append-only order**: message order within a chunk is stable; reads
///   return messages in append order.
/// - **One writable era**: [`append_message`](ChunkStore::append_message)
///   always targets the current era. Writes against frozen eras fail with
///   [`StoreError::Unavailable`](crate::StoreError::Unavailable).
/// - **Atomic rollover**: a concurrent append lands wholly in the old era
///   or wholly in the new one, never split.
/// - **No snapshot isolation**: listing the current era may reflect
///   in-flight appends; frozen eras are stable under concurrent reads.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// The era currently open for writing.
    async fn current_era(&self) -> Result<Era>;

    /// Every era known to the store (frozen ones plus the current era).
    async fn eras(&self) -> Result<Vec<Era>>;

    /// Freeze the current era and open the next writable one.
    ///
    /// Serializes with concurrent appends.
    async fn rollover_era(&self) -> Result<Era>;

    /// Get or create a chunk.
    ///
    /// Idempotent. Creating a chunk in a frozen era fails with
    /// [`StoreError::Unavailable`](crate::StoreError::Unavailable); opening
    /// an existing frozen chunk is fine.
    async fn open_or_create_chunk(&self, format: &str, uri: &str, era: Era) -> Result<ChunkInfo>;

    /// Append a message to the chunk's tail in the current era.
    ///
    /// Creates the chunk if absent. All-or-nothing per message.
    async fn append_message(
        &self,
        format: &str,
        uri: &str,
        message: StoredMessage,
    ) -> Result<ChunkInfo>;

    /// List every chunk in an era.
    async fn list_chunks(&self, era: Era) -> Result<Vec<ChunkInfo>>;

    /// Read a chunk's messages in append order, skipping the first `after`.
    ///
    /// A missing chunk reads as empty.
    async fn read_messages(
        &self,
        format: &str,
        uri: &str,
        era: Era,
        after: u64,
    ) -> Result<Vec<StoredMessage>>;

    /// Number of messages in a chunk (0 if absent).
    async fn message_count(&self, format: &str, uri: &str, era: Era) -> Result<u64>;

    /// Number of messages for `(format, uri)` across all eras.
    ///
    /// Used to compute best-effort delta hints during sync.
    async fn total_message_count(&self, format: &str, uri: &str) -> Result<u64> {
        let mut total = 0;
        for era in self.eras().await? {
            total += self.message_count(format, uri, era).await?;
        }
        Ok(total)
    }
}
