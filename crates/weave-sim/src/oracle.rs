use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use weave_core::config::ReplicaConfig;
use weave_core::{Atom, AtomId, Ingested, Replica, SiteId};

use crate::replica::{ReplicaIndex, ReplicaState};
use crate::rng::DeterministicRng;

// ── Core result types ─────────────────────────────────────────────────────────

/// Oracle result for an invariant check.
///
/// Returned by each checker and by [`ConvergenceOracle::check_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    /// Every invariant that was violated.
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

/// Diagnostic information for a single failed invariant check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantViolation {
    /// Two replicas ended with different linearizations.
    Convergence {
        replica_a: ReplicaIndex,
        replica_b: ReplicaIndex,
        digest_a: String,
        digest_b: String,
        /// Atoms woven in `replica_a` but absent in `replica_b`.
        only_in_a: Vec<AtomId>,
        /// Atoms woven in `replica_b` but absent in `replica_a`.
        only_in_b: Vec<AtomId>,
    },

    /// Ingesting the same atoms in another order produced another weave.
    Commutativity {
        /// Zero-based index of the shuffled permutation that diverged.
        permutation_index: usize,
        expected_digest: String,
        actual_digest: String,
    },

    /// Re-ingesting an already woven atom changed the weave.
    Idempotence {
        atom: AtomId,
        digest_before: String,
        digest_after: String,
    },

    /// An atom is woven without its cause, or before it.
    CausalOrder {
        replica: ReplicaIndex,
        atom: AtomId,
        cause: AtomId,
    },

    /// An atom is separated from its cause's subtree by an unrelated atom.
    Contiguity {
        replica: ReplicaIndex,
        atom: AtomId,
        cause: AtomId,
    },

    /// Atoms were still waiting on causes after the final drain.
    PendingNotDrained {
        replica: ReplicaIndex,
        waiting: usize,
    },
}

// ── Convergence summary ───────────────────────────────────────────────────────

/// Quick convergence summary attached to every simulation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    /// Whether all replica digests are identical.
    pub converged: bool,
    /// Replicas whose digest differs from replica 0.
    pub divergent_replicas: Vec<ReplicaIndex>,
    /// Atoms in replica 0's weave.
    pub canonical_len: usize,
    /// Replica 0's digest.
    pub canonical_digest: String,
}

// ── Oracle ────────────────────────────────────────────────────────────────────

/// Oracle for verifying weave invariants after simulation.
///
/// # Invariants checked
///
/// 1. **Convergence** (`check_convergence`): every replica has the same
///    linearization.
/// 2. **Commutativity** (`check_commutativity`): any delivery order of the
///    emitted atoms rebuilds the same linearization.
/// 3. **Idempotence** (`check_idempotence`): re-ingesting is a no-op.
/// 4. **Causal order** (`check_causality`): every cause is woven before its
///    effects.
/// 5. **Contiguity** (`check_contiguity`): every subtree occupies one
///    contiguous run.
/// 6. **Buffer drained** (`check_pending_drained`): nothing is left waiting.
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    /// Compare all replica digests against replica 0.
    #[must_use]
    pub fn evaluate(states: &[ReplicaState]) -> ConvergenceReport {
        let Some(canonical) = states.first() else {
            return ConvergenceReport {
                converged: true,
                divergent_replicas: Vec::new(),
                canonical_len: 0,
                canonical_digest: String::new(),
            };
        };

        let divergent_replicas: Vec<ReplicaIndex> = states
            .iter()
            .filter(|state| state.digest != canonical.digest)
            .map(|state| state.id)
            .collect();

        ConvergenceReport {
            converged: divergent_replicas.is_empty(),
            divergent_replicas,
            canonical_len: canonical.sequence.len(),
            canonical_digest: canonical.digest.clone(),
        }
    }

    // ── Invariant 1: Convergence ─────────────────────────────────────────────

    /// Check every replica pair for identical linearizations.
    ///
    /// Reports every divergent pair, not just the first.
    #[must_use]
    pub fn check_convergence(states: &[ReplicaState]) -> OracleResult {
        let mut violations = Vec::new();

        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                if a.digest == b.digest {
                    continue;
                }
                violations.push(InvariantViolation::Convergence {
                    replica_a: a.id,
                    replica_b: b.id,
                    digest_a: a.digest.clone(),
                    digest_b: b.digest.clone(),
                    only_in_a: missing_from(&a.sequence, &b.sequence),
                    only_in_b: missing_from(&b.sequence, &a.sequence),
                });
            }
        }

        OracleResult::from_violations(violations)
    }

    // ── Invariant 2: Commutativity ────────────────────────────────────────────

    /// Rebuild a fresh weave from `iterations` random permutations of
    /// `atoms` and compare each against the weave built in the given order.
    #[must_use]
    pub fn check_commutativity(
        atoms: &[Atom],
        rng: &mut DeterministicRng,
        iterations: usize,
    ) -> OracleResult {
        if atoms.len() < 2 {
            return OracleResult::from_violations(Vec::new());
        }

        let expected_digest = rebuild(atoms.to_vec()).weave().digest();
        let mut violations = Vec::new();

        for permutation_index in 0..iterations {
            let mut shuffled = atoms.to_vec();
            rng.shuffle(&mut shuffled);
            let actual_digest = rebuild(shuffled).weave().digest();

            if actual_digest != expected_digest {
                violations.push(InvariantViolation::Commutativity {
                    permutation_index,
                    expected_digest: expected_digest.clone(),
                    actual_digest,
                });
            }
        }

        OracleResult::from_violations(violations)
    }

    // ── Invariant 3: Idempotence ──────────────────────────────────────────────

    /// Weave `atoms`, then ingest each one again and confirm nothing moves.
    #[must_use]
    pub fn check_idempotence(atoms: &[Atom]) -> OracleResult {
        let mut replica = rebuild(atoms.to_vec());
        let mut violations = Vec::new();

        for atom in atoms {
            let digest_before = replica.weave().digest();
            let outcome = replica.ingest(atom.clone());
            let digest_after = replica.weave().digest();

            if outcome != Ok(Ingested::Duplicate) || digest_after != digest_before {
                violations.push(InvariantViolation::Idempotence {
                    atom: atom.id().clone(),
                    digest_before,
                    digest_after,
                });
            }
        }

        OracleResult::from_violations(violations)
    }

    // ── Invariant 4: Causal order ─────────────────────────────────────────────

    /// Check that each atom's cause is woven at an earlier position.
    #[must_use]
    pub fn check_causality(states: &[ReplicaState]) -> OracleResult {
        let mut violations = Vec::new();

        for state in states {
            let positions: HashMap<&AtomId, usize> = state
                .sequence
                .iter()
                .enumerate()
                .map(|(index, atom)| (atom.id(), index))
                .collect();

            for (index, atom) in state.sequence.iter().enumerate() {
                let Some(cause) = atom.cause() else { continue };
                let ok = positions.get(cause).is_some_and(|&at| at < index);
                if !ok {
                    violations.push(InvariantViolation::CausalOrder {
                        replica: state.id,
                        atom: atom.id().clone(),
                        cause: cause.clone(),
                    });
                }
            }
        }

        OracleResult::from_violations(violations)
    }

    // ── Invariant 5: Contiguity ───────────────────────────────────────────────

    /// Check that each sequence is a valid pre-order walk.
    ///
    /// Walks the sequence keeping the chain of open ancestors; an atom's cause
    /// must be on that chain, otherwise the cause's subtree was already closed
    /// and the atom lands outside it.
    #[must_use]
    pub fn check_contiguity(states: &[ReplicaState]) -> OracleResult {
        let mut violations = Vec::new();

        for state in states {
            let mut open: Vec<&AtomId> = Vec::new();
            for atom in &state.sequence {
                match atom.cause() {
                    None => open.clear(),
                    Some(cause) => match open.iter().rposition(|id| *id == cause) {
                        Some(depth) => open.truncate(depth + 1),
                        None => {
                            violations.push(InvariantViolation::Contiguity {
                                replica: state.id,
                                atom: atom.id().clone(),
                                cause: cause.clone(),
                            });
                            open.clear();
                        }
                    },
                }
                open.push(atom.id());
            }
        }

        OracleResult::from_violations(violations)
    }

    // ── Invariant 6: Buffer drained ───────────────────────────────────────────

    #[must_use]
    pub fn check_pending_drained(states: &[ReplicaState]) -> OracleResult {
        let violations = states
            .iter()
            .filter(|state| state.pending > 0)
            .map(|state| InvariantViolation::PendingNotDrained {
                replica: state.id,
                waiting: state.pending,
            })
            .collect();

        OracleResult::from_violations(violations)
    }

    // ── Composite runner ─────────────────────────────────────────────────────

    /// Run every check and return a merged result.
    ///
    /// `atoms` must be every atom emitted during the simulation, in emission
    /// order; `rng` drives the commutativity permutations.
    #[must_use]
    pub fn check_all(
        states: &[ReplicaState],
        atoms: &[Atom],
        rng: &mut DeterministicRng,
    ) -> OracleResult {
        Self::check_convergence(states)
            .merge(Self::check_commutativity(atoms, rng, 8))
            .merge(Self::check_idempotence(atoms))
            .merge(Self::check_causality(states))
            .merge(Self::check_contiguity(states))
            .merge(Self::check_pending_drained(states))
    }
}

/// Ids in `sequence` that `other` lacks, in `sequence` order.
fn missing_from(sequence: &[Atom], other: &[Atom]) -> Vec<AtomId> {
    let present: HashSet<&AtomId> = other.iter().map(Atom::id).collect();
    sequence
        .iter()
        .map(Atom::id)
        .filter(|id| !present.contains(id))
        .cloned()
        .collect()
}

/// A throwaway unbounded replica holding exactly `atoms`.
fn rebuild(atoms: Vec<Atom>) -> Replica {
    let mut replica = Replica::with_reducer(
        SiteId::new("oracle"),
        ReplicaConfig::unbounded(),
        weave_core::reducer::NullReducer,
    );
    replica.ingest_all(atoms);
    replica
}

// ── Tests ─────────────────────────────────────────────────────────────────────
