//! # Haversack Testkit
//!
//! Testing utilities for the haversack engine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: peers with pre-exchanged keys and one-call encounters
//!   over in-memory streams
//! - **Generators**: proptest strategies for identities, chunks, and PDUs
//!
//! ## Test Fixtures
//!
//! Quickly set up a mesh of peers that know each other:
//!
//! ```rust
//! use haversack_testkit::fixtures::{encounter, mesh};
//!
//! # async fn demo() {
//! let peers = mesh(&["alice", "bob", "carol"]);
//! encounter(&peers[0], &peers[1]).await;
//! # }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use haversack_testkit::generators::chunk_offer;
//!
//! proptest! {
//!     #[test]
//!     fn offers_survive_the_wire(offer in chunk_offer()) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{encounter, introduce, mesh, TestPeer};
