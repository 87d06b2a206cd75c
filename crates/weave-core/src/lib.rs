//! weave-core library.
//!
//! A causal-tree CRDT: replicas append immutable atoms without coordination
//! and every replica holding the same atoms sees them in the same order.
//!
//! - [`identity`]: atom ids and the sibling tie-break order.
//! - [`atom`]: the immutable unit of change and its opaque payload.
//! - [`weave`]: the linearized forest, insertion and traversal.
//! - [`pending`]: atoms waiting on a cause that has not arrived.
//! - [`replica`]: the single insertion path tying the pieces together.
//! - [`reducer`]: insertion notifications for application state.
//! - [`codec`]: JSON-lines encoding of an atom sequence.
//!
//! # Conventions
//!
//! - **Errors**: library errors are `thiserror` enums with an [`error::ErrorCode`];
//!   `anyhow::Result` only at edges such as config loading.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod atom;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod pending;
pub mod reducer;
pub mod replica;
pub mod weave;

pub use atom::{Atom, Payload};
pub use error::{ErrorCode, WeaveError};
pub use identity::{AtomId, SiteId, Weight};
pub use replica::{Ingested, Replica};
pub use weave::{InsertResult, Weave};
