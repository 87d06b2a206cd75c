//! Atoms: the immutable unit of change.
//!
//! An atom carries its identity, an optional cause, and a payload the core
//! never interprets. Deletion is an application convention (a tombstone atom
//! whose payload says so); the weave treats it like any other atom.

use serde::{Deserialize, Serialize};

use crate::identity::AtomId;

/// Application payload carried by an atom.
///
/// The core only stores, compares, and forwards payloads.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// No payload (e.g. a structural anchor).
    #[default]
    Empty,
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Structured application value.
    Json(serde_json::Value),
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// An immutable, uniquely identified unit of causal history.
///
/// Fields are private so an atom cannot be edited after construction.
/// Whether `cause` exists is checked by the weave on insertion, not here:
/// atoms may be built (or decoded) before their cause is known locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    id: AtomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cause: Option<AtomId>,
    #[serde(default)]
    payload: Payload,
}

impl Atom {
    /// Build an atom. `cause == None` makes it a root.
    #[must_use]
    pub const fn new(id: AtomId, cause: Option<AtomId>, payload: Payload) -> Self {
        Self { id, cause, payload }
    }

    /// Build a root atom.
    #[must_use]
    pub const fn root(id: AtomId, payload: Payload) -> Self {
        Self::new(id, None, payload)
    }

    /// Build an atom caused by `cause`.
    #[must_use]
    pub const fn child(id: AtomId, cause: AtomId, payload: Payload) -> Self {
        Self::new(id, Some(cause), payload)
    }

    #[must_use]
    pub const fn id(&self) -> &AtomId {
        &self.id
    }

    #[must_use]
    pub const fn cause(&self) -> Option<&AtomId> {
        self.cause.as_ref()
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.cause.is_none()
    }

    /// True when `other` carries the same id, cause, and payload.
    ///
    /// Equality of atoms is by id alone; this is the stricter check used to
    /// tell a harmless re-delivery from an identity collision.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id && self.cause == other.cause && self.payload == other.payload
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Atom {}

impl std::hash::Hash for Atom {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SiteId;

    fn id(site: &str, timestamp: u64) -> AtomId {
        AtomId::new(SiteId::new(site), timestamp, 0)
    }

    #[test]
    fn root_has_no_cause() {
        let atom = Atom::root(id("a", 1), Payload::Empty);
        assert!(atom.is_root());
        assert!(atom.cause().is_none());
    }

    #[test]
    fn equality_is_by_id_only() {
        let a = Atom::root(id("a", 1), "x".into());
        let b = Atom::child(id("a", 1), id("b", 9), "y".into());
        assert_eq!(a, b);
        assert!(!a.same_content(&b));
    }

    #[test]
    fn same_content_requires_matching_payload() {
        let a = Atom::child(id("a", 2), id("a", 1), "x".into());
        let b = Atom::child(id("a", 2), id("a", 1), "x".into());
        let c = Atom::child(id("a", 2), id("a", 1), "z".into());
        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
    }

    #[test]
    fn payload_serializes_with_tag() {
        let json = serde_json::to_string(&Payload::Text("hi".into())).expect("serialize");
        assert_eq!(json, r#"{"kind":"text","value":"hi"}"#);

        let empty = serde_json::to_string(&Payload::Empty).expect("serialize");
        assert_eq!(empty, r#"{"kind":"empty"}"#);
    }

    #[test]
    fn root_atom_omits_cause_when_serialized() {
        let atom = Atom::root(id("a", 1), Payload::Empty);
        let json = serde_json::to_string(&atom).expect("serialize");
        assert!(!json.contains("cause"));
        let back: Atom = serde_json::from_str(&json).expect("parse");
        assert!(back.same_content(&atom));
    }
}
