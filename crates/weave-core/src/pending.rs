//! Staging area for atoms that arrived before their cause.
//!
//! Atoms are keyed by the cause they wait on. When that cause is woven,
//! [`PendingBuffer::on_inserted`] releases everything waiting on it, and
//! everything waiting on those atoms in turn, until no more progress is
//! possible. Atoms whose cause never shows up stay buffered; nothing is
//! dropped silently.
//!
//! Alongside the buckets the buffer keeps each held atom's cause, so an
//! offered atom can be checked against the chain of buffered causes it would
//! wait behind. An atom that would end up waiting on itself is refused.

use std::collections::{HashMap, VecDeque};

use crate::atom::Atom;
use crate::error::WeaveError;
use crate::identity::AtomId;
use crate::reducer::Reducer;
use crate::weave::{InsertResult, Weave};

/// An atom released from the buffer and woven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub id: AtomId,
    /// Index the atom landed at when it was woven.
    pub position: usize,
}

/// Outcome of one [`PendingBuffer::on_inserted`] cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Release {
    /// Atoms woven, in the order they were inserted.
    pub released: Vec<Released>,
    /// Atoms the weave refused (identity collisions); they are not re-buffered.
    pub rejected: Vec<WeaveError>,
}

impl Release {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.rejected.is_empty()
    }
}

/// Atoms waiting on a missing cause, keyed by that cause.
#[derive(Debug, Clone, Default)]
pub struct PendingBuffer {
    waiting: HashMap<AtomId, Vec<Atom>>,
    /// Buffered atom id to the cause it waits on.
    causes: HashMap<AtomId, AtomId>,
    len: usize,
    limit: Option<usize>,
}

impl PendingBuffer {
    /// An unbounded buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that refuses new atoms once it holds `limit` of them.
    #[must_use]
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Number of buffered atoms.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is buffered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Configured bound, if any.
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Causes that at least one buffered atom is waiting for.
    pub fn waiting_on(&self) -> impl Iterator<Item = &AtomId> + '_ {
        self.waiting.keys()
    }

    /// Returns `true` if an atom with this id is buffered.
    #[must_use]
    pub fn is_buffered(&self, id: &AtomId) -> bool {
        self.causes.contains_key(id)
    }

    /// Buffer `atom` under its cause.
    ///
    /// Returns `Ok(true)` if the atom was added, `Ok(false)` if it was already
    /// buffered or is a root (roots never wait on anything).
    ///
    /// # Errors
    ///
    /// - [`WeaveError::SelfCausation`] if the atom names itself as its cause;
    ///   such an atom could never be released.
    /// - [`WeaveError::CausalCycle`] if following buffered atoms from the
    ///   declared cause leads back to this atom.
    /// - [`WeaveError::IdentityCollision`] if a different atom with the same
    ///   id is already buffered.
    /// - [`WeaveError::PendingBufferFull`] if the configured limit is reached.
    ///   The atom is not buffered and the caller must re-deliver it later.
    pub fn offer(&mut self, atom: Atom) -> Result<bool, WeaveError> {
        let Some(cause) = atom.cause().cloned() else {
            return Ok(false);
        };
        if &cause == atom.id() {
            return Err(WeaveError::SelfCausation {
                id: atom.id().clone(),
            });
        }

        if self.causes.contains_key(atom.id()) {
            let held = self.waiting.get(&cause).is_some_and(|bucket| {
                bucket
                    .iter()
                    .any(|held| held.id() == atom.id() && held.same_content(&atom))
            });
            if held {
                return Ok(false);
            }
            tracing::warn!(atom = %atom.id(), "different atom already buffered under this id");
            return Err(WeaveError::IdentityCollision {
                id: atom.id().clone(),
            });
        }

        if self.leads_back_to(&cause, atom.id()) {
            tracing::warn!(atom = %atom.id(), cause = %cause, "refusing atom that closes a cause cycle");
            return Err(WeaveError::CausalCycle {
                id: atom.id().clone(),
                cause,
            });
        }

        if let Some(limit) = self.limit.filter(|&limit| self.len >= limit) {
            tracing::warn!(
                atom = %atom.id(),
                cause = %cause,
                limit,
                "pending buffer full; refusing atom"
            );
            return Err(WeaveError::PendingBufferFull {
                limit,
                id: atom.id().clone(),
                cause,
            });
        }

        tracing::debug!(atom = %atom.id(), cause = %cause, "buffering atom until cause arrives");
        self.push(cause, atom);
        Ok(true)
    }

    /// Remove and return every atom waiting directly on `cause`, in arrival order.
    pub fn take(&mut self, cause: &AtomId) -> Vec<Atom> {
        let atoms = self.waiting.remove(cause).unwrap_or_default();
        for atom in &atoms {
            self.causes.remove(atom.id());
        }
        self.len -= atoms.len();
        atoms
    }

    /// Release everything that was waiting on `id`, which has just been woven.
    ///
    /// Released atoms are woven in arrival order; each one that lands may
    /// release further atoms. The cascade ends when no buffered atom's cause
    /// is newly present. Each pass removes atoms from the buffer, so it
    /// always terminates.
    pub fn on_inserted<R: Reducer + ?Sized>(
        &mut self,
        id: &AtomId,
        weave: &mut Weave,
        reducer: &mut R,
    ) -> Release {
        let mut release = Release::default();
        let mut woken = VecDeque::from([id.clone()]);

        while let Some(cause) = woken.pop_front() {
            for atom in self.take(&cause) {
                if let Some(waiting_for) = atom.cause().filter(|c| !weave.contains(c)).cloned() {
                    self.push(waiting_for, atom);
                    continue;
                }

                let atom_id = atom.id().clone();
                match weave.insert_with(atom, reducer) {
                    Ok(InsertResult::Inserted(position)) => {
                        woken.push_back(atom_id.clone());
                        release.released.push(Released {
                            id: atom_id,
                            position,
                        });
                    }
                    Ok(InsertResult::AlreadyPresent | InsertResult::CauseMissing) => {}
                    Err(err) => release.rejected.push(err),
                }
            }
        }

        if !release.is_empty() {
            tracing::debug!(
                trigger = %id,
                released = release.released.len(),
                rejected = release.rejected.len(),
                still_pending = self.len,
                "pending buffer drained"
            );
        }
        release
    }

    /// Returns `true` if the chain of buffered causes starting at `cause`
    /// reaches `id`.
    ///
    /// The chain ends at the first cause that is not itself buffered. The
    /// buffer never holds a cycle, so the walk visits at most `len` atoms.
    fn leads_back_to(&self, cause: &AtomId, id: &AtomId) -> bool {
        let mut current = cause;
        for _ in 0..self.len {
            let Some(next) = self.causes.get(current) else {
                return false;
            };
            if next == id {
                return true;
            }
            current = next;
        }
        false
    }

    fn push(&mut self, cause: AtomId, atom: Atom) {
        self.causes.insert(atom.id().clone(), cause.clone());
        self.waiting.entry(cause).or_default().push(atom);
        self.len += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Payload;
    use crate::identity::SiteId;
    use crate::reducer::{NullReducer, Recorder};

    fn id(site: &str, timestamp: u64) -> AtomId {
        AtomId::new(SiteId::new(site), timestamp, 0)
    }

    fn child(site: &str, timestamp: u64, cause: &AtomId) -> Atom {
        Atom::child(id(site, timestamp), cause.clone(), Payload::Empty)
    }

    #[test]
    fn offer_records_under_cause() {
        let mut buffer = PendingBuffer::new();
        assert_eq!(buffer.offer(child("B", 2, &id("A", 1))), Ok(true));
        assert_eq!(buffer.len(), 1);
        assert!(buffer.is_buffered(&id("B", 2)));
        let waiting: Vec<&AtomId> = buffer.waiting_on().collect();
        assert_eq!(waiting, vec![&id("A", 1)]);
    }

    #[test]
    fn duplicate_offer_is_collapsed() {
        let mut buffer = PendingBuffer::new();
        buffer.offer(child("B", 2, &id("A", 1))).expect("first");
        assert_eq!(buffer.offer(child("B", 2, &id("A", 1))), Ok(false));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn roots_are_never_buffered() {
        let mut buffer = PendingBuffer::new();
        let root = Atom::root(id("A", 1), Payload::Empty);
        assert_eq!(buffer.offer(root), Ok(false));
        assert!(buffer.is_empty());
    }

    #[test]
    fn self_caused_atom_refused() {
        let mut buffer = PendingBuffer::new();
        assert!(matches!(
            buffer.offer(child("A", 1, &id("A", 1))),
            Err(WeaveError::SelfCausation { .. })
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn limit_reports_pressure_without_dropping_held_atoms() {
        let mut buffer = PendingBuffer::with_limit(Some(1));
        buffer.offer(child("B", 2, &id("A", 1))).expect("first fits");
        let err = buffer
            .offer(child("C", 3, &id("A", 1)))
            .expect_err("second is refused");
        assert_eq!(
            err,
            WeaveError::PendingBufferFull {
                limit: 1,
                id: id("C", 3),
                cause: id("A", 1),
            }
        );
        assert_eq!(buffer.len(), 1);
        assert!(buffer.is_buffered(&id("B", 2)));
    }

    #[test]
    fn take_preserves_arrival_order() {
        let mut buffer = PendingBuffer::new();
        let cause = id("A", 1);
        buffer.offer(child("C", 1, &cause)).expect("c");
        buffer.offer(child("B", 1, &cause)).expect("b");
        let taken: Vec<String> = buffer
            .take(&cause)
            .iter()
            .map(|atom| atom.id().to_string())
            .collect();
        assert_eq!(taken, vec!["C@1", "B@1"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn cascade_releases_chain_several_deep() {
        let mut weave = Weave::new();
        let mut buffer = PendingBuffer::new();
        let a1 = id("A", 1);
        let a2 = id("A", 2);
        let a3 = id("A", 3);

        buffer.offer(child("A", 4, &a3)).expect("a4");
        buffer.offer(child("A", 3, &a2)).expect("a3");
        buffer.offer(child("A", 2, &a1)).expect("a2");

        weave
            .insert(Atom::root(a1.clone(), Payload::Empty))
            .expect("root");
        let mut recorder = Recorder::new();
        let release = buffer.on_inserted(&a1, &mut weave, &mut recorder);

        let released: Vec<String> = release.released.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(released, vec!["A@2", "A@3", "A@4"]);
        assert!(release.rejected.is_empty());
        assert!(buffer.is_empty());
        assert_eq!(weave.len(), 4);
        assert_eq!(recorder.deltas().len(), 3);
    }

    #[test]
    fn unrelated_atoms_stay_buffered() {
        let mut weave = Weave::new();
        let mut buffer = PendingBuffer::new();
        buffer.offer(child("B", 2, &id("Z", 9))).expect("orphan");

        weave
            .insert(Atom::root(id("A", 1), Payload::Empty))
            .expect("root");
        let release = buffer.on_inserted(&id("A", 1), &mut weave, &mut NullReducer);
        assert!(release.is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn collision_during_release_is_reported() {
        let mut weave = Weave::new();
        let mut buffer = PendingBuffer::new();
        let r = id("A", 1);
        weave
            .insert(Atom::root(r.clone(), Payload::Empty))
            .expect("root");
        weave
            .insert(Atom::child(id("B", 1), r.clone(), "x".into()))
            .expect("b");

        let other_root = id("C", 1);
        buffer
            .offer(Atom::child(id("B", 1), other_root.clone(), "y".into()))
            .expect("impostor");
        weave
            .insert(Atom::root(other_root.clone(), Payload::Empty))
            .expect("c");
        let release = buffer.on_inserted(&other_root, &mut weave, &mut NullReducer);
        assert!(release.released.is_empty());
        assert_eq!(
            release.rejected,
            vec![WeaveError::IdentityCollision { id: id("B", 1) }]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn two_atom_cycle_is_refused() {
        let mut buffer = PendingBuffer::new();
        let a = id("A", 2);
        let b = id("B", 3);
        assert_eq!(buffer.offer(child("A", 2, &b)), Ok(true));
        assert_eq!(
            buffer.offer(child("B", 3, &a)),
            Err(WeaveError::CausalCycle { id: b, cause: a })
        );
        assert_eq!(buffer.len(), 1);
        assert!(!buffer.is_buffered(&id("B", 3)));
    }

    #[test]
    fn longer_cycle_is_refused_at_the_closing_atom() {
        let mut buffer = PendingBuffer::new();
        buffer.offer(child("A", 1, &id("B", 1))).expect("a waits on b");
        buffer.offer(child("B", 1, &id("C", 1))).expect("b waits on c");
        assert!(matches!(
            buffer.offer(child("C", 1, &id("A", 1))),
            Err(WeaveError::CausalCycle { .. })
        ));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn chain_through_unrelated_atoms_is_not_a_cycle() {
        let mut buffer = PendingBuffer::new();
        buffer.offer(child("A", 1, &id("B", 1))).expect("a waits on b");
        buffer.offer(child("B", 1, &id("C", 1))).expect("b waits on c");
        assert_eq!(buffer.offer(child("D", 1, &id("A", 1))), Ok(true));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn different_atom_under_a_buffered_id_collides() {
        let mut buffer = PendingBuffer::new();
        buffer.offer(child("B", 2, &id("A", 1))).expect("first");
        assert_eq!(
            buffer.offer(child("B", 2, &id("Q", 1))),
            Err(WeaveError::IdentityCollision { id: id("B", 2) })
        );
        assert_eq!(
            buffer.offer(Atom::child(id("B", 2), id("A", 1), "other".into())),
            Err(WeaveError::IdentityCollision { id: id("B", 2) })
        );
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn released_atoms_leave_no_stale_cause() {
        let mut weave = Weave::new();
        let mut buffer = PendingBuffer::new();
        let root = id("A", 1);
        buffer.offer(child("B", 2, &root)).expect("b");
        weave
            .insert(Atom::root(root.clone(), Payload::Empty))
            .expect("root");
        buffer.on_inserted(&root, &mut weave, &mut NullReducer);
        assert!(!buffer.is_buffered(&id("B", 2)));
        assert_eq!(buffer.offer(child("B", 2, &id("Q", 9))), Ok(true));
    }
}
