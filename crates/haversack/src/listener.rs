use std::sync::{Arc, RwLock};

use bytes::Bytes;
use haversack_core::{Era, PeerId};

use crate::session::SessionId;

/// A batch of application payloads that just landed in local storage.
///
/// Messages are grouped by provenance: every payload in one delivery shares
/// the same end-to-end sender and the same hop list.
#[derive(Debug, Clone)]
pub struct ChunkDelivery {
    pub session: SessionId,
    pub format: String,
    pub uri: String,
    /// The local era the messages were appended into.
    pub era: Era,
    pub messages: Vec<Bytes>,
    /// The peer that originally authored these messages.
    pub sender: PeerId,
    /// Every peer the messages passed through before arriving here.
    pub hops: Vec<PeerId>,
}

/// Application callback for newly received chunk content.
///
/// Listener failures are logged and never fail the session; a sick consumer
/// must not stall the exchange for everyone else.
pub trait ChunkListener: Send + Sync {
    fn chunk_received(&self, delivery: &ChunkDelivery) -> anyhow::Result<()>;
}

/// Application callback for encounter teardown.
pub trait CloseListener: Send + Sync {
    fn encounter_closed(&self, session: SessionId);
}

#[derive(Default)]
pub(crate) struct ListenerSet {
    chunk: RwLock<Vec<Arc<dyn ChunkListener>>>,
    close: RwLock<Vec<Arc<dyn CloseListener>>>,
}

impl ListenerSet {
    pub(crate) fn add_chunk(&self, listener: Arc<dyn ChunkListener>) {
        self.chunk
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub(crate) fn add_close(&self, listener: Arc<dyn CloseListener>) {
        self.close
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub(crate) fn dispatch(&self, delivery: &ChunkDelivery) {
        let listeners = self
            .chunk
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            if let Err(error) = listener.chunk_received(delivery) {
                tracing::warn!(
                    session = %delivery.session,
                    format = %delivery.format,
                    uri = %delivery.uri,
                    %error,
                    "chunk listener failed"
                );
            }
        }
    }

    pub(crate) fn notify_closed(&self, session: SessionId) {
        let listeners = self
            .close
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.encounter_closed(session);
        }
    }
}
