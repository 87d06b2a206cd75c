//! Notification boundary between the weave and application state.
//!
//! The core never folds atoms into application state. Instead every
//! successful insertion is reported to a [`Reducer`] with the atom and the
//! index it landed at, so the consumer can patch its state incrementally.

use crate::atom::{Atom, Payload};
use crate::identity::AtomId;

/// One successful insertion, as seen by a reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertEvent<'a> {
    pub atom_id: &'a AtomId,
    pub cause: Option<&'a AtomId>,
    pub payload: &'a Payload,
    /// Index of the atom in the linear sequence right after insertion.
    pub position: usize,
}

impl<'a> InsertEvent<'a> {
    #[must_use]
    pub const fn new(atom: &'a Atom, position: usize) -> Self {
        Self {
            atom_id: atom.id(),
            cause: atom.cause(),
            payload: atom.payload(),
            position,
        }
    }

    /// Clone the borrowed fields into an owned delta.
    #[must_use]
    pub fn to_owned_delta(&self) -> Delta {
        Delta {
            atom_id: self.atom_id.clone(),
            cause: self.cause.cloned(),
            payload: self.payload.clone(),
            position: self.position,
        }
    }
}

/// Owned form of an [`InsertEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub atom_id: AtomId,
    pub cause: Option<AtomId>,
    pub payload: Payload,
    pub position: usize,
}

/// Receives insertion notifications from the weave.
pub trait Reducer {
    fn on_insert(&mut self, event: &InsertEvent<'_>);
}

/// Reducer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReducer;

impl Reducer for NullReducer {
    fn on_insert(&mut self, _event: &InsertEvent<'_>) {}
}

/// Reducer that keeps every notification as an owned [`Delta`].
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    deltas: Vec<Delta>,
}

impl Recorder {
    #[must_use]
    pub const fn new() -> Self {
        Self { deltas: Vec::new() }
    }

    /// Deltas recorded since the last [`drain`](Self::drain).
    #[must_use]
    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// Take the recorded deltas, leaving the recorder empty.
    pub fn drain(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.deltas)
    }
}

impl Reducer for Recorder {
    fn on_insert(&mut self, event: &InsertEvent<'_>) {
        self.deltas.push(event.to_owned_delta());
    }
}

impl<R: Reducer + ?Sized> Reducer for &mut R {
    fn on_insert(&mut self, event: &InsertEvent<'_>) {
        (**self).on_insert(event);
    }
}
