//! One replica's insertion path.
//!
//! A [`Replica`] owns a site's clock, weave, pending buffer, and reducer.
//! Local creations and remote deliveries both go through
//! [`Replica::ingest`], so the weave only ever has one mutator. Callers that
//! share a replica across threads wrap it in a `Mutex`; nothing inside
//! blocks.
//!
//! # Ingestion
//!
//! | Weave says        | Replica does                                  |
//! |-------------------|-----------------------------------------------|
//! | `Inserted`        | releases every buffered atom that can now land |
//! | `AlreadyPresent`  | nothing; reports [`Ingested::Duplicate`]      |
//! | `CauseMissing`    | buffers the atom; reports [`Ingested::Deferred`] |

use tracing::instrument;

use crate::atom::{Atom, Payload};
use crate::clock::LamportClock;
use crate::config::ReplicaConfig;
use crate::error::WeaveError;
use crate::identity::{AtomId, SiteId};
use crate::pending::{PendingBuffer, Released};
use crate::reducer::{NullReducer, Reducer};
use crate::weave::{InsertResult, Weave};

/// What happened to an atom handed to [`Replica::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    /// The atom was woven at `position`; `released` lists buffered atoms
    /// that were woven as a consequence.
    Inserted {
        position: usize,
        released: Vec<Released>,
    },
    /// The atom was already woven (or already buffered).
    Duplicate,
    /// The atom's cause is missing; it waits in the pending buffer.
    Deferred,
}

/// Summary of a bulk ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Atoms woven, including ones released from the buffer.
    pub woven: usize,
    pub duplicates: usize,
    pub deferred: usize,
    /// Atoms refused by the weave or the buffer.
    pub rejected: Vec<WeaveError>,
}

/// A replica's local state plus its single insertion path.
#[derive(Debug, Clone)]
pub struct Replica<R = NullReducer> {
    site: SiteId,
    clock: LamportClock,
    weave: Weave,
    pending: PendingBuffer,
    config: ReplicaConfig,
    reducer: R,
}

impl Replica<NullReducer> {
    /// A replica with default config and no reducer.
    #[must_use]
    pub fn new(site: SiteId) -> Self {
        Self::with_reducer(site, ReplicaConfig::default(), NullReducer)
    }
}

impl<R: Reducer> Replica<R> {
    /// A replica that reports every insertion to `reducer`.
    #[must_use]
    pub fn with_reducer(site: SiteId, config: ReplicaConfig, reducer: R) -> Self {
        Self {
            site,
            clock: LamportClock::new(),
            weave: Weave::new(),
            pending: PendingBuffer::with_limit(config.pending_bound()),
            config,
            reducer,
        }
    }

    #[must_use]
    pub const fn site(&self) -> &SiteId {
        &self.site
    }

    #[must_use]
    pub const fn weave(&self) -> &Weave {
        &self.weave
    }

    #[must_use]
    pub const fn pending(&self) -> &PendingBuffer {
        &self.pending
    }

    #[must_use]
    pub const fn clock(&self) -> &LamportClock {
        &self.clock
    }

    #[must_use]
    pub const fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    #[must_use]
    pub const fn reducer(&self) -> &R {
        &self.reducer
    }

    pub const fn reducer_mut(&mut self) -> &mut R {
        &mut self.reducer
    }

    /// Create a local atom with the configured default priority and weave it.
    ///
    /// # Errors
    ///
    /// See [`create_with_priority`](Self::create_with_priority).
    pub fn create(&mut self, cause: Option<&AtomId>, payload: Payload) -> Result<Atom, WeaveError> {
        self.create_with_priority(cause, payload, self.config.default_priority)
    }

    /// Create a local atom and weave it.
    ///
    /// The timestamp is taken from this replica's clock, so it is larger than
    /// every timestamp the replica has observed. A cause that has not arrived
    /// yet is allowed; the new atom is buffered until it does.
    ///
    /// # Errors
    ///
    /// - [`WeaveError::ClockExhausted`] once the clock has reached `u64::MAX`.
    /// - [`WeaveError::IdentityCollision`] if the new id is already taken,
    ///   including by an identical atom.
    /// - Anything else [`ingest`](Self::ingest) returns for the new atom.
    pub fn create_with_priority(
        &mut self,
        cause: Option<&AtomId>,
        payload: Payload,
        priority: i32,
    ) -> Result<Atom, WeaveError> {
        let Some(timestamp) = self.clock.tick() else {
            tracing::warn!(site = %self.site, "clock exhausted; refusing to create atom");
            return Err(WeaveError::ClockExhausted {
                site: self.site.clone(),
            });
        };
        let id = AtomId::new(self.site.clone(), timestamp, priority);
        let atom = Atom::new(id, cause.cloned(), payload);
        match self.ingest(atom.clone())? {
            Ingested::Inserted { .. } | Ingested::Deferred => Ok(atom),
            Ingested::Duplicate => Err(WeaveError::IdentityCollision {
                id: atom.id().clone(),
            }),
        }
    }

    /// Feed one atom (local or remote) through the insertion path.
    ///
    /// # Errors
    ///
    /// - [`WeaveError::IdentityCollision`] and [`WeaveError::SelfCausation`]
    ///   from the weave.
    /// - [`WeaveError::CausalCycle`] if the atom must wait and its cause
    ///   already waits on it.
    /// - [`WeaveError::PendingBufferFull`] if the atom must wait and the
    ///   buffer is at its limit.
    ///
    /// Collisions found while releasing buffered atoms are logged and do not
    /// fail this call.
    #[instrument(level = "debug", skip(self, atom), fields(site = %self.site, atom = %atom.id()))]
    pub fn ingest(&mut self, atom: Atom) -> Result<Ingested, WeaveError> {
        self.clock.observe(atom.id().timestamp);
        let id = atom.id().clone();

        let deferred = atom.clone();
        match self.weave.insert_with(atom, &mut self.reducer)? {
            InsertResult::Inserted(position) => {
                let release = self
                    .pending
                    .on_inserted(&id, &mut self.weave, &mut self.reducer);
                for err in &release.rejected {
                    tracing::warn!(error = %err, "buffered atom rejected on release");
                }
                Ok(Ingested::Inserted {
                    position,
                    released: release.released,
                })
            }
            InsertResult::AlreadyPresent => Ok(Ingested::Duplicate),
            InsertResult::CauseMissing => {
                if self.pending.offer(deferred)? {
                    Ok(Ingested::Deferred)
                } else {
                    Ok(Ingested::Duplicate)
                }
            }
        }
    }

    /// Ingest a batch in the order given, collecting per-atom outcomes.
    ///
    /// Errors on individual atoms are collected rather than aborting the batch.
    pub fn ingest_all(&mut self, atoms: impl IntoIterator<Item = Atom>) -> IngestReport {
        let mut report = IngestReport::default();
        for atom in atoms {
            match self.ingest(atom) {
                Ok(Ingested::Inserted { released, .. }) => report.woven += 1 + released.len(),
                Ok(Ingested::Duplicate) => report.duplicates += 1,
                Ok(Ingested::Deferred) => report.deferred += 1,
                Err(err) => report.rejected.push(err),
            }
        }
        report
    }

    /// Pull every atom `other` has woven into this replica.
    pub fn merge_from<S>(&mut self, other: &Replica<S>) -> IngestReport {
        self.ingest_all(other.weave.to_sequence())
    }
}
