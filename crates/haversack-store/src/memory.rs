//! In-memory implementation of the ChunkStore trait.
//!
//! This is primarily for testing. It has the same semantics as the
//! filesystem store but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use haversack_core::Era;

use crate::error::{Result, StoreError};
use crate::traits::{ChunkInfo, ChunkStore, StoredMessage};

/// In-memory chunk store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; the
/// current-era pointer lives inside the same lock as the chunk map, so
/// rollover and append serialize and a message never splits across eras.
pub struct MemoryChunkStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// The era currently open for writing.
    current: Era,
    /// Chunks indexed by (era, format, uri). BTreeMap keeps listing stable.
    chunks: BTreeMap<(Era, String, String), Vec<StoredMessage>>,
}

impl MemoryChunkStore {
    /// Create a new empty in-memory store at era zero.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                current: Era::ZERO,
                chunks: BTreeMap::new(),
            }),
        }
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn current_era(&self) -> Result<Era> {
        Ok(self.read_inner().current)
    }

    async fn eras(&self) -> Result<Vec<Era>> {
        let inner = self.read_inner();
        let mut eras: Vec<Era> = inner.chunks.keys().map(|(era, _, _)| *era).collect();
        eras.push(inner.current);
        eras.sort_unstable();
        eras.dedup();
        Ok(eras)
    }

    async fn rollover_era(&self) -> Result<Era> {
        let mut inner = self.write_inner();
        inner.current = inner.current.next();
        Ok(inner.current)
    }

    async fn open_or_create_chunk(&self, format: &str, uri: &str, era: Era) -> Result<ChunkInfo> {
        let mut inner = self.write_inner();
        let key = (era, format.to_owned(), uri.to_owned());

        if let Some(messages) = inner.chunks.get(&key) {
            return Ok(ChunkInfo {
                format: format.to_owned(),
                uri: uri.to_owned(),
                era,
                message_count: messages.len() as u64,
            });
        }

        if era != inner.current {
            return Err(StoreError::Unavailable(format!(
                "era {era} is frozen, cannot create chunk {format}|{uri}"
            )));
        }

        inner.chunks.insert(key, Vec::new());
        Ok(ChunkInfo {
            format: format.to_owned(),
            uri: uri.to_owned(),
            era,
            message_count: 0,
        })
    }

    async fn append_message(
        &self,
        format: &str,
        uri: &str,
        message: StoredMessage,
    ) -> Result<ChunkInfo> {
        let mut inner = self.write_inner();
        let era = inner.current;
        let key = (era, format.to_owned(), uri.to_owned());

        let messages = inner.chunks.entry(key).or_default();
        messages.push(message);
        Ok(ChunkInfo {
            format: format.to_owned(),
            uri: uri.to_owned(),
            era,
            message_count: messages.len() as u64,
        })
    }

    async fn list_chunks(&self, era: Era) -> Result<Vec<ChunkInfo>> {
        let inner = self.read_inner();
        Ok(inner
            .chunks
            .iter()
            .filter(|((e, _, _), _)| *e == era)
            .map(|((e, format, uri), messages)| ChunkInfo {
                format: format.clone(),
                uri: uri.clone(),
                era: *e,
                message_count: messages.len() as u64,
            })
            .collect())
    }

    async fn read_messages(
        &self,
        format: &str,
        uri: &str,
        era: Era,
        after: u64,
    ) -> Result<Vec<StoredMessage>> {
        let inner = self.read_inner();
        let key = (era, format.to_owned(), uri.to_owned());
        Ok(inner
            .chunks
            .get(&key)
            .map(|messages| messages.iter().skip(after as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn message_count(&self, format: &str, uri: &str, era: Era) -> Result<u64> {
        let inner = self.read_inner();
        let key = (era, format.to_owned(), uri.to_owned());
        Ok(inner.chunks.get(&key).map(|m| m.len() as u64).unwrap_or(0))
    }
}
