//! Peer identities.
//!
//! A peer identity is an application-scoped string assigned out of band
//! (provisioning, pairing, prior encounters). The engine treats it as an
//! opaque key into the key store and as provenance in hop lists.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a peer in the opportunistic network.
///
/// Distinct from the transport address: the same peer may be met over TCP
/// today and Bluetooth tomorrow under the same `PeerId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
