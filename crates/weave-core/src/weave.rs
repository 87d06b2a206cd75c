//! The weave: a causal forest of atoms kept in one deterministic linear order.
//!
//! Atoms live in an append-only arena addressed by [`Handle`]; the linear
//! order is a vector of handles. Each arena node also records the number of
//! descendants it has, so the atoms of a subtree always occupy
//! `position ..= position + span` and can be skipped in one step.
//!
//! # Invariants
//!
//! - **Causality**: an atom's cause sits at a smaller index.
//! - **Contiguity**: an atom's descendants follow it immediately, before the
//!   span of its next sibling.
//! - **Sibling order**: children of one cause (and the roots) appear in
//!   ascending [`Weight`] order, whatever the arrival order.
//!
//! Together these make the order a pre-order walk of the forest with sorted
//! children, so two weaves holding the same atoms hold the same sequence.
//!
//! # Cost
//!
//! Nothing stores positions. An atom's index is found by walking down from
//! its root, stepping over earlier siblings at each level in one move per
//! subtree. Placing an atom costs that walk to its cause, a walk over the
//! cause's direct children, and a walk back up the ancestor chain to bump
//! spans: proportional to the siblings along the causal path, not to the
//! length of the weave. Shifting the handle vector on insert is a plain
//! memory move.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::atom::Atom;
use crate::error::WeaveError;
use crate::identity::{AtomId, SiteId, Weight};
use crate::reducer::{InsertEvent, NullReducer, Reducer};

// ---------------------------------------------------------------------------
// InsertResult
// ---------------------------------------------------------------------------

/// Outcome of [`Weave::insert`] for an atom that did not violate identity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The atom was placed at this index of the linear sequence.
    Inserted(usize),
    /// An atom with identical id, cause, and payload is already woven.
    AlreadyPresent,
    /// The atom's cause is not in the weave yet.
    CauseMissing,
}

impl InsertResult {
    /// The index the atom landed at, if it was inserted.
    #[must_use]
    pub const fn position(self) -> Option<usize> {
        match self {
            Self::Inserted(position) => Some(position),
            Self::AlreadyPresent | Self::CauseMissing => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// Stable arena index of a woven atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Handle(usize);

#[derive(Debug, Clone)]
struct Node {
    atom: Atom,
    parent: Option<Handle>,
    /// Number of transitive descendants.
    span: usize,
}

// ---------------------------------------------------------------------------
// Weave
// ---------------------------------------------------------------------------

/// Ordered collection of atoms that maintains the causal-tree invariants.
#[derive(Debug, Clone, Default)]
pub struct Weave {
    nodes: Vec<Node>,
    order: Vec<Handle>,
    /// site -> timestamp -> handle.
    index: HashMap<SiteId, HashMap<u64, Handle>>,
}

impl Weave {
    /// Create an empty weave.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty weave with room for `capacity` atoms.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            index: HashMap::new(),
        }
    }

    /// Number of woven atoms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no atom has been woven.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Insert an atom without notifying anyone.
    ///
    /// # Errors
    ///
    /// See [`insert_with`](Self::insert_with).
    pub fn insert(&mut self, atom: Atom) -> Result<InsertResult, WeaveError> {
        self.insert_with(atom, &mut NullReducer)
    }

    /// Insert an atom and report a successful placement to `reducer`.
    ///
    /// Re-delivery of an already woven atom is a no-op. An atom whose cause
    /// is absent is handed back as [`InsertResult::CauseMissing`] untouched;
    /// the caller decides whether to buffer it.
    ///
    /// Finding the cause walks its ancestor chain and placing the atom walks
    /// the cause's children; see the module-level cost notes.
    ///
    /// # Errors
    ///
    /// - [`WeaveError::SelfCausation`] if the atom names itself as its cause.
    /// - [`WeaveError::IdentityCollision`] if an atom with the same
    ///   `(site, timestamp)` but different priority, cause, or payload is
    ///   already woven.
    pub fn insert_with<R: Reducer + ?Sized>(
        &mut self,
        atom: Atom,
        reducer: &mut R,
    ) -> Result<InsertResult, WeaveError> {
        if atom.cause() == Some(atom.id()) {
            return Err(WeaveError::SelfCausation {
                id: atom.id().clone(),
            });
        }

        if let Some(existing) = self.slot(atom.id()) {
            if self.node(existing).atom.same_content(&atom) {
                tracing::trace!(atom = %atom.id(), "atom already woven");
                return Ok(InsertResult::AlreadyPresent);
            }
            tracing::warn!(
                atom = %atom.id(),
                existing = %self.node(existing).atom.id(),
                "identity collision"
            );
            return Err(WeaveError::IdentityCollision {
                id: atom.id().clone(),
            });
        }

        let (start, end, parent) = match atom.cause() {
            None => (0, self.order.len(), None),
            Some(cause) => {
                let Some((handle, position)) = self.locate(cause) else {
                    tracing::debug!(atom = %atom.id(), cause = %cause, "cause missing");
                    return Ok(InsertResult::CauseMissing);
                };
                let first_child = position + 1;
                (first_child, first_child + self.node(handle).span, Some(handle))
            }
        };

        let position = self.sibling_slot(start, end, atom.id());
        let handle = Handle(self.nodes.len());

        self.index
            .entry(atom.id().site.clone())
            .or_default()
            .insert(atom.id().timestamp, handle);
        self.nodes.push(Node {
            atom,
            parent,
            span: 0,
        });
        self.order.insert(position, handle);

        let mut ancestor = parent;
        while let Some(up) = ancestor {
            let node = &mut self.nodes[up.0];
            node.span += 1;
            ancestor = node.parent;
        }

        let atom = &self.node(handle).atom;
        tracing::debug!(atom = %atom.id(), position, "atom woven");
        reducer.on_insert(&InsertEvent::new(atom, position));

        Ok(InsertResult::Inserted(position))
    }

    /// Returns `true` if the atom with exactly this id is woven.
    #[must_use]
    pub fn contains(&self, id: &AtomId) -> bool {
        self.handle_of(id).is_some()
    }

    /// Look up a woven atom.
    #[must_use]
    pub fn get(&self, id: &AtomId) -> Option<&Atom> {
        self.handle_of(id).map(|handle| &self.node(handle).atom)
    }

    /// Index of an atom in the linear sequence.
    ///
    /// Walks down the atom's ancestor chain, so the cost grows with the
    /// siblings passed on the way, not with the length of the weave.
    #[must_use]
    pub fn position_of(&self, id: &AtomId) -> Option<usize> {
        self.locate(id).map(|(_, position)| position)
    }

    /// Number of transitive descendants of an atom.
    #[must_use]
    pub fn descendant_count(&self, id: &AtomId) -> Option<usize> {
        self.handle_of(id).map(|handle| self.node(handle).span)
    }

    /// The ordering key of a woven atom.
    #[must_use]
    pub fn weight(&self, id: &AtomId) -> Option<Weight<'_>> {
        self.get(id).map(|atom| atom.id().weight())
    }

    /// Direct children of `id`, in final order.
    ///
    /// The iterator is lazy and finite; clone it (or call again) to restart.
    /// An unknown id yields nothing.
    #[must_use]
    pub fn children_of(&self, id: &AtomId) -> Children<'_> {
        match self.locate(id) {
            Some((handle, position)) => {
                let start = position + 1;
                Children {
                    weave: self,
                    position: start,
                    end: start + self.node(handle).span,
                }
            }
            None => Children {
                weave: self,
                position: 0,
                end: 0,
            },
        }
    }

    /// Root atoms, in final order.
    #[must_use]
    pub fn roots(&self) -> Children<'_> {
        Children {
            weave: self,
            position: 0,
            end: self.order.len(),
        }
    }

    /// Iterate the linearization without cloning.
    pub fn iter(&self) -> impl Iterator<Item = &Atom> + '_ {
        self.order.iter().map(|&handle| &self.node(handle).atom)
    }

    /// The full linearization.
    #[must_use]
    pub fn to_sequence(&self) -> Vec<Atom> {
        self.iter().cloned().collect()
    }

    /// BLAKE3 digest of the ordered atom ids, as `blake3:<hex>`.
    ///
    /// Two weaves have equal digests exactly when their linearizations name
    /// the same atoms in the same order.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for atom in self.iter() {
            let id = atom.id();
            let site = id.site.as_str().as_bytes();
            hasher.update(&(site.len() as u64).to_le_bytes());
            hasher.update(site);
            hasher.update(&id.timestamp.to_le_bytes());
            hasher.update(&id.priority.to_le_bytes());
        }
        format!("blake3:{}", hasher.finalize().to_hex())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn node(&self, handle: Handle) -> &Node {
        &self.nodes[handle.0]
    }

    /// Handle of whatever atom occupies `(site, timestamp)`, ignoring priority.
    fn slot(&self, id: &AtomId) -> Option<Handle> {
        self.index.get(&id.site)?.get(&id.timestamp).copied()
    }

    /// Handle of the atom with exactly this id.
    fn handle_of(&self, id: &AtomId) -> Option<Handle> {
        self.slot(id)
            .filter(|&handle| self.node(handle).atom.id() == id)
    }

    fn locate(&self, id: &AtomId) -> Option<(Handle, usize)> {
        let handle = self.handle_of(id)?;

        let mut path = vec![handle];
        let mut up = self.node(handle).parent;
        while let Some(parent) = up {
            path.push(parent);
            up = self.node(parent).parent;
        }

        // Descend root first; each level searches only its parent's subtree.
        let mut start = 0;
        let mut end = self.order.len();
        let mut found = 0;
        for &target in path.iter().rev() {
            found = self.sibling_position(start, end, target)?;
            start = found + 1;
            end = start + self.node(target).span;
        }
        Some((handle, found))
    }

    /// Index of `target` among the sibling subtrees laid out in `start..end`.
    fn sibling_position(&self, start: usize, end: usize, target: Handle) -> Option<usize> {
        let mut position = start;
        while position < end {
            let here = self.order[position];
            if here == target {
                return Some(position);
            }
            position += 1 + self.node(here).span;
        }
        None
    }

    /// First index in `start..end` where `id` sorts before the sibling found
    /// there, or `end` if it sorts after all of them.
    fn sibling_slot(&self, start: usize, end: usize, id: &AtomId) -> usize {
        let mut position = start;
        while position < end {
            let sibling = self.node(self.order[position]);
            if id.sibling_cmp(sibling.atom.id()) == Ordering::Less {
                break;
            }
            tracing::trace!(atom = %id, sibling = %sibling.atom.id(), skip = sibling.span, "passing sibling");
            position += 1 + sibling.span;
        }
        position
    }
}

// ---------------------------------------------------------------------------
// Children
// ---------------------------------------------------------------------------

/// Lazy iterator over the direct children of one atom (or the roots).
#[derive(Debug, Clone)]
pub struct Children<'a> {
    weave: &'a Weave,
    position: usize,
    end: usize,
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a AtomId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }
        let node = self.weave.node(self.weave.order[self.position]);
        self.position += 1 + node.span;
        Some(node.atom.id())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
