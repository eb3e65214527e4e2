//! # Haversack
//!
//! An opportunistic, store-carry-forward data exchange engine. Devices
//! accumulate application messages in era-partitioned chunks and, whenever
//! two of them come within reach of each other over any duplex byte stream,
//! hold an *encounter*: both sides announce what they carry, pull what they
//! are missing, and part ways. Messages hop from device to device until they
//! reach peers that care about them.
//!
//! The engine is transport-agnostic. TCP, Bluetooth, a pipe in a test: if it
//! reads and writes bytes, [`EncounterManager::handle_connection`] can run
//! an encounter over it.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use haversack::{ConnectionType, EncounterConfig, EncounterManager};
//! use haversack_core::{CryptoSettings, InMemoryKeyStore, PeerId};
//! use haversack_store::MemoryChunkStore;
//!
//! # async fn demo(stream: tokio::io::DuplexStream) -> anyhow::Result<()> {
//! let keystore = Arc::new(InMemoryKeyStore::generate(PeerId::from("alice")));
//! let manager = EncounterManager::new(
//!     keystore,
//!     MemoryChunkStore::new(),
//!     EncounterConfig::default(),
//! );
//!
//! manager
//!     .send_message("text/plain", "status", "out hiking, back sunday", CryptoSettings::SIGNED)
//!     .await?;
//!
//! // Later, a transport hands us a connected peer.
//! let mut session = manager.handle_connection(stream, ConnectionType::Bluetooth);
//! session.closed().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod guard;
pub mod listener;
pub mod manager;
pub mod session;

pub use error::{EncounterError, Result};
pub use guard::{GuardedStream, IdleGuard};
pub use listener::{ChunkDelivery, ChunkListener, CloseListener};
pub use manager::{EncounterConfig, EncounterManager, SessionHandle};
pub use session::{ConnectionType, SessionId, SessionState};
