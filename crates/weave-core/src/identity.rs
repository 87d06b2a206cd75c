//! Atom identity and the sibling tie-break order.
//!
//! Every atom is named by an [`AtomId`]: the authoring site, that site's
//! Lamport timestamp, and an author-assigned priority. `(site, timestamp)` is
//! globally unique; priority is an ordering hint only.
//!
//! # Sibling order
//!
//! Atoms that share a cause (or that are all roots) are ordered by their
//! [`Weight`]:
//!
//! 1. **Priority**: higher priority sorts first.
//! 2. **Timestamp**: newer (higher) timestamp sorts first.
//! 3. **Site**: lexicographically smaller site sorts first.
//!
//! Two distinct atoms can never compare equal because `(site, timestamp)` is
//! unique.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SiteId
// ---------------------------------------------------------------------------

/// Stable identifier of the replica that authored an atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    /// Wrap a site name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The site name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ---------------------------------------------------------------------------
// AtomId
// ---------------------------------------------------------------------------

/// Identity of an atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomId {
    /// Authoring replica.
    pub site: SiteId,
    /// Lamport timestamp, unique per site.
    pub timestamp: u64,
    /// Author-assigned ordering hint.
    #[serde(default)]
    pub priority: i32,
}

impl AtomId {
    #[must_use]
    pub const fn new(site: SiteId, timestamp: u64, priority: i32) -> Self {
        Self {
            site,
            timestamp,
            priority,
        }
    }

    /// The `(site, timestamp)` pair that must be globally unique.
    #[must_use]
    pub fn key(&self) -> (&SiteId, u64) {
        (&self.site, self.timestamp)
    }

    /// The ordering key used to place this atom among its siblings.
    #[must_use]
    pub fn weight(&self) -> Weight<'_> {
        Weight {
            priority: self.priority,
            timestamp: self.timestamp,
            site: &self.site,
        }
    }

    /// Compare two ids by sibling order. `Less` means `self` is placed first.
    #[must_use]
    pub fn sibling_cmp(&self, other: &Self) -> Ordering {
        self.weight().cmp(&other.weight())
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.priority == 0 {
            write!(f, "{}@{}", self.site, self.timestamp)
        } else {
            write!(f, "{}@{}^{}", self.site, self.timestamp, self.priority)
        }
    }
}

// ---------------------------------------------------------------------------
// Weight
// ---------------------------------------------------------------------------

/// The `(priority, timestamp, site)` triple that decides sibling order.
///
/// `Ord` is arranged so that ascending order is placement order: the smallest
/// weight is the first sibling in the weave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Weight<'a> {
    pub priority: i32,
    pub timestamp: u64,
    pub site: &'a SiteId,
}

impl Ord for Weight<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| self.site.cmp(other.site))
    }
}

impl PartialOrd for Weight<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
