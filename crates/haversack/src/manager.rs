//! The encounter manager: the long-lived engine an application embeds.
//!
//! One manager owns the chunk store, the key material, the interest set and
//! the crypto policy, and runs any number of concurrent encounter sessions
//! against it. Transports stay outside: whoever owns a freshly connected
//! duplex stream hands it to [`EncounterManager::handle_connection`] and the
//! manager does the rest.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use haversack_core::p2p::CryptoSettings;
use haversack_core::{KeyStore, PeerId};
use haversack_store::{ChunkInfo, ChunkStore, StoredMessage};

use crate::error::{EncounterError, Result};
use crate::guard::IdleGuard;
use crate::listener::{ChunkDelivery, ChunkListener, CloseListener, ListenerSet};
use crate::session::{ConnectionType, Session, SessionId, SessionState, SyncProgress};

/// Tunables for a manager. The defaults suit interactive use.
#[derive(Debug, Clone, Copy)]
pub struct EncounterConfig {
    /// Base idle timeout for sessions. A silent peer is abandoned after
    /// twice this long, or after this long once it has said anything.
    pub idle_timeout: Duration,
    /// Crypto policy for chunks without a per-chunk override.
    pub default_settings: CryptoSettings,
    /// Capacity of the delivery queue feeding chunk listeners.
    pub delivery_queue: usize,
}

impl Default for EncounterConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            default_settings: CryptoSettings::PLAIN,
            delivery_queue: 64,
        }
    }
}

/// Handle to one running session: inspect or await its lifecycle.
pub struct SessionHandle {
    pub id: SessionId,
    pub connection: ConnectionType,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Resolves once the session reaches `Closed`.
    pub async fn closed(&mut self) {
        loop {
            if *self.state.borrow_and_update() == SessionState::Closed {
                return;
            }
            if self.state.changed().await.is_err() {
                return;
            }
        }
    }

    /// Tear the session down without waiting for the protocol to finish.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// The opportunistic sync engine. Generic over storage; share it behind an
/// `Arc` and feed it streams as peers come within reach.
pub struct EncounterManager<S> {
    local: PeerId,
    store: Arc<S>,
    keystore: Arc<dyn KeyStore>,
    config: EncounterConfig,
    interests: RwLock<HashSet<String>>,
    chunk_settings: RwLock<HashMap<(String, String), CryptoSettings>>,
    listeners: Arc<ListenerSet>,
    delivery: mpsc::Sender<ChunkDelivery>,
    /// How far we have read into each peer's chunk eras, across sessions.
    progress: SyncProgress,
    next_session: AtomicU64,
}

impl<S: ChunkStore + 'static> EncounterManager<S> {
    pub fn new(keystore: Arc<dyn KeyStore>, store: S, config: EncounterConfig) -> Self {
        let listeners = Arc::new(ListenerSet::default());
        let (delivery, mut inbox) = mpsc::channel::<ChunkDelivery>(config.delivery_queue.max(1));

        // Listener callbacks run on a dedicated task so a slow consumer
        // backpressures sessions through the queue instead of blocking them
        // inline. The task drains naturally once every sender is gone.
        let dispatch_targets = Arc::clone(&listeners);
        tokio::spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                dispatch_targets.dispatch(&delivery);
            }
        });

        Self {
            local: keystore.owner().clone(),
            store: Arc::new(store),
            keystore,
            config,
            interests: RwLock::new(HashSet::new()),
            chunk_settings: RwLock::new(HashMap::new()),
            listeners,
            delivery,
            progress: SyncProgress::default(),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Ask future sessions to pull chunks of this format from peers. With no
    /// declared interests, sessions pull everything.
    pub fn declare_interest(&self, format: impl Into<String>) {
        self.interests
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(format.into());
    }

    pub fn add_chunk_listener(&self, listener: Arc<dyn ChunkListener>) {
        self.listeners.add_chunk(listener);
    }

    pub fn add_close_listener(&self, listener: Arc<dyn CloseListener>) {
        self.listeners.add_close(listener);
    }

    /// Author a message locally: append it to the chunk's tail and remember
    /// the crypto policy under which the chunk travels.
    pub async fn send_message(
        &self,
        format: &str,
        uri: &str,
        payload: impl Into<Bytes>,
        settings: CryptoSettings,
    ) -> Result<ChunkInfo> {
        self.chunk_settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((format.to_string(), uri.to_string()), settings);
        let info = self
            .store
            .append_message(format, uri, StoredMessage::local(payload, self.local.clone()))
            .await?;
        Ok(info)
    }

    /// Freeze the current era and start a fresh one.
    pub async fn rollover_era(&self) -> Result<haversack_core::Era> {
        Ok(self.store.rollover_era().await?)
    }

    /// Run the encounter protocol over a connected duplex stream. Returns
    /// immediately; the session runs on its own task until the exchange
    /// completes, the peer vanishes, or the idle guard fires.
    pub fn handle_connection<IO>(&self, io: IO, connection: ConnectionType) -> SessionHandle
    where
        IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let session = Session::new(
            id,
            self.local.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.keystore),
            self.config.default_settings,
            self.chunk_settings
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            self.interests
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            self.delivery.clone(),
            state_tx,
            Arc::clone(&self.progress),
        );

        tracing::info!(session = %id, %connection, "encounter started");
        let guard = IdleGuard::start(self.config.idle_timeout);
        let listeners = Arc::clone(&self.listeners);
        let task = tokio::spawn(async move {
            match session.run(io, guard).await {
                Ok(()) => tracing::info!(session = %id, "encounter closed"),
                Err(EncounterError::IdleTimeout) => {
                    tracing::info!(session = %id, "encounter abandoned after idle timeout");
                }
                Err(error) => {
                    tracing::warn!(session = %id, %error, "encounter failed");
                }
            }
            listeners.notify_closed(id);
        });

        SessionHandle {
            id,
            connection,
            state: state_rx,
            task,
        }
    }
}
