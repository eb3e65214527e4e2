//! Test fixtures and helpers.
//!
//! Common setup code for integration and scenario tests: peers with
//! pre-exchanged keys, and one-call encounters over in-memory streams.

use std::sync::Arc;

use haversack::{ConnectionType, EncounterConfig, EncounterManager, SessionState};
use haversack_core::{InMemoryKeyStore, PeerId};
use haversack_store::MemoryChunkStore;

/// Buffer size for in-memory test streams; comfortably larger than any
/// single frame the scenarios produce.
pub const STREAM_BUFFER: usize = 256 * 1024;

/// A peer under test: key material plus a running manager over an in-memory
/// store.
pub struct TestPeer {
    pub id: PeerId,
    pub keys: Arc<InMemoryKeyStore>,
    pub manager: EncounterManager<MemoryChunkStore>,
}

impl TestPeer {
    /// A peer with freshly generated keys and default configuration.
    pub fn new(name: &str) -> Self {
        Self::with_config(name, EncounterConfig::default())
    }

    pub fn with_config(name: &str, config: EncounterConfig) -> Self {
        let keys = Arc::new(InMemoryKeyStore::generate(PeerId::from(name)));
        let manager = EncounterManager::new(keys.clone(), MemoryChunkStore::new(), config);
        Self {
            id: PeerId::from(name),
            keys,
            manager,
        }
    }
}

/// Exchange public key material between two peers, both directions.
pub fn introduce(a: &TestPeer, b: &TestPeer) {
    a.keys.add_peer(b.id.clone(), b.keys.public_keys());
    b.keys.add_peer(a.id.clone(), a.keys.public_keys());
}

/// A set of peers that all know each other's keys.
pub fn mesh(names: &[&str]) -> Vec<TestPeer> {
    let peers: Vec<TestPeer> = names.iter().map(|name| TestPeer::new(name)).collect();
    for i in 0..peers.len() {
        for j in (i + 1)..peers.len() {
            introduce(&peers[i], &peers[j]);
        }
    }
    peers
}

/// Run one full encounter between two peers over an in-memory duplex stream
/// and wait for both sides to close.
pub async fn encounter(left: &TestPeer, right: &TestPeer) {
    let (near, far) = tokio::io::duplex(STREAM_BUFFER);
    let mut left_session = left.manager.handle_connection(near, ConnectionType::Loopback);
    let mut right_session = right.manager.handle_connection(far, ConnectionType::Loopback);
    left_session.closed().await;
    right_session.closed().await;
    assert_eq!(left_session.state(), SessionState::Closed);
    assert_eq!(right_session.state(), SessionState::Closed);
}
