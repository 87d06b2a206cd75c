use serde::{Deserialize, Serialize};
use weave_core::config::ReplicaConfig;
use weave_core::reducer::Recorder;
use weave_core::replica::IngestReport;
use weave_core::{Atom, AtomId, Ingested, Payload, Replica, SiteId, WeaveError};

use crate::rng::DeterministicRng;

/// Stable index of a simulated replica.
pub type ReplicaIndex = usize;

/// Priority given to simulated tombstones so they stay next to their target.
const TOMBSTONE_PRIORITY: i32 = 1;

/// Immutable snapshot of a replica's local state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    /// Replica index.
    pub id: ReplicaIndex,
    /// The replica's site name.
    pub site: SiteId,
    /// BLAKE3 digest of the linearization.
    pub digest: String,
    /// The full linearization.
    pub sequence: Vec<Atom>,
    /// Atoms still waiting on a missing cause.
    pub pending: usize,
}

/// How an authored atom relates to the rest of the weave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitRates {
    /// Chance of starting a new root even when atoms exist.
    pub root_percent: u8,
    /// Chance that a child is a tombstone for its cause.
    pub tombstone_percent: u8,
}

/// One replica in the simulation: a real [`Replica`] plus the ids it has
/// woven so far, which it draws causes from.
#[derive(Debug, Clone)]
pub struct SimulatedReplica {
    id: ReplicaIndex,
    replica: Replica<Recorder>,
    woven: Vec<AtomId>,
}

impl SimulatedReplica {
    /// Create a replica with site name `r<id>`.
    #[must_use]
    pub fn new(id: ReplicaIndex, config: ReplicaConfig) -> Self {
        Self {
            id,
            replica: Replica::with_reducer(SiteId::new(format!("r{id}")), config, Recorder::new()),
            woven: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ReplicaIndex {
        self.id
    }

    #[must_use]
    pub const fn replica(&self) -> &Replica<Recorder> {
        &self.replica
    }

    /// Author a new atom: a root, or a child of a random woven atom.
    ///
    /// # Errors
    ///
    /// Propagates a rejection from the underlying replica.
    pub fn emit(&mut self, rng: &mut DeterministicRng, rates: EmitRates) -> Result<Atom, WeaveError> {
        let cause = if rng.hit_rate_percent(rates.root_percent) {
            None
        } else {
            rng.choose(&self.woven).cloned()
        };

        let atom = match &cause {
            Some(target) if rng.hit_rate_percent(rates.tombstone_percent) => {
                self.replica.create_with_priority(
                    Some(target),
                    Payload::Json(serde_json::json!({ "delete": target.to_string() })),
                    TOMBSTONE_PRIORITY,
                )
            }
            _ => {
                let text = format!("{}:{}", self.replica.site(), self.woven.len());
                self.replica.create(cause.as_ref(), Payload::Text(text))
            }
        };

        self.absorb_deltas();
        atom
    }

    /// Apply a delivered atom.
    ///
    /// # Errors
    ///
    /// Propagates a rejection from the underlying replica.
    pub fn receive(&mut self, atom: Atom) -> Result<Ingested, WeaveError> {
        let outcome = self.replica.ingest(atom);
        self.absorb_deltas();
        outcome
    }

    /// Ingest a peer's full linearization.
    pub fn sync_from(&mut self, sequence: Vec<Atom>) -> IngestReport {
        let report = self.replica.ingest_all(sequence);
        self.absorb_deltas();
        report
    }

    /// The replica's current linearization.
    #[must_use]
    pub fn sequence(&self) -> Vec<Atom> {
        self.replica.weave().to_sequence()
    }

    /// Get an immutable snapshot of current local state.
    #[must_use]
    pub fn snapshot(&self) -> ReplicaState {
        ReplicaState {
            id: self.id,
            site: self.replica.site().clone(),
            digest: self.replica.weave().digest(),
            sequence: self.sequence(),
            pending: self.replica.pending().len(),
        }
    }

    fn absorb_deltas(&mut self) {
        let deltas = self.replica.reducer_mut().drain();
        self.woven.extend(deltas.into_iter().map(|delta| delta.atom_id));
    }
}
