//! Timestamp type used on the wire and inside blocks.
//!
//! Timestamps are Unix epoch milliseconds (UTC), the resolution the
//! handshake and the block header both carry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Unix timestamp in milliseconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current system time as a `Timestamp`.
    ///
    /// A clock set before the Unix epoch reads as [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(millis as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since this timestamp (relative to `now`).
    pub fn elapsed_since(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
