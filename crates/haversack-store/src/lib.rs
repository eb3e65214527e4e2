//! # Haversack Store
//!
//! The chunk storage engine: application data persisted as chunks keyed by
//! `(format, uri)` and partitioned into time-bounded eras.
//!
//! ## Overview
//!
//! Exactly one era is writable at a time; a rollover freezes it and opens
//! the next. Frozen eras are immutable, which is what lets an encounter
//! enumerate and serve them without coordination. Message payloads are
//! opaque to the engine; it records them in append order together with
//! their relay provenance (E2E sender and hop list).
//!
//! ## Key Types
//!
//! - [`ChunkStore`] - The async trait shared by all encounter sessions
//! - [`FsChunkStore`] - Filesystem-backed persistent storage
//! - [`MemoryChunkStore`] - In-memory storage for tests
//! - [`StoredMessage`] - One payload plus provenance
//! - [`ChunkInfo`] - Chunk identity and size
//!
//! ## Persisted layout
//!
//! ```text
//! <root>/era            current era number
//! <root>/<era>/         one directory per era
//!     <format>#<uri>    one chunk file (components percent-escaped),
//!                       length-prefixed CBOR message records
//! ```

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use fs::FsChunkStore;
pub use memory::MemoryChunkStore;
pub use traits::{ChunkInfo, ChunkStore, StoredMessage};
