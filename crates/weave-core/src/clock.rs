//! Per-replica Lamport clock.
//!
//! The clock is ordinary state owned by a [`crate::replica::Replica`], never a
//! process global, so any number of replicas can live in one process.

use serde::{Deserialize, Serialize};

/// Lamport counter for a single site.
///
/// Local creation calls [`tick`](Self::tick); every atom received from a peer
/// is passed to [`observe`](Self::observe). A tick is always strictly greater
/// than every timestamp this clock has seen, so an atom created after
/// observing its cause carries a larger timestamp than that cause.
///
/// Once `u64::MAX` has been issued or observed there is no larger timestamp
/// left, and [`tick`](Self::tick) returns `None` instead of repeating one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LamportClock {
    max_seen: u64,
}

impl LamportClock {
    /// A clock that has observed nothing.
    #[must_use]
    pub const fn new() -> Self {
        Self { max_seen: 0 }
    }

    /// Advance past everything observed and return the new timestamp.
    ///
    /// Returns `None`, leaving the clock untouched, when it is exhausted.
    pub const fn tick(&mut self) -> Option<u64> {
        let Some(next) = self.max_seen.checked_add(1) else {
            return None;
        };
        self.max_seen = next;
        Some(next)
    }

    /// Returns `true` if no further timestamp can be issued.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.max_seen == u64::MAX
    }

    /// Record a timestamp seen on an incoming atom.
    pub fn observe(&mut self, timestamp: u64) {
        self.max_seen = self.max_seen.max(timestamp);
    }

    /// Largest timestamp issued or observed so far.
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.max_seen
    }
}
