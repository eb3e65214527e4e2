//! Storage eras.
//!
//! An era is an integer-tagged epoch partitioning chunk storage over time.
//! Exactly one era is writable at any moment; all earlier eras are frozen.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Era numbers advance modulo this value.
///
/// The wrap-around keeps era directory names short and bounds the numeric
/// range a store ever has to compare.
pub const ERA_MODULUS: u32 = 1 << 24;

/// A storage epoch tag.
///
/// Eras are created by rollover in monotonic order (modulo [`ERA_MODULUS`]).
/// A frozen era's contents are immutable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Era(pub u32);

impl Era {
    /// The first era of a fresh store.
    pub const ZERO: Self = Self(0);

    /// Create from a raw era number.
    ///
    /// The value is reduced modulo [`ERA_MODULUS`].
    pub const fn new(n: u32) -> Self {
        Self(n % ERA_MODULUS)
    }

    /// The era that follows this one after a rollover.
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % ERA_MODULUS)
    }

    /// The raw era number.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
