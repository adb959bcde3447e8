//! Foundation types for relic, a replicated content-addressed metadata store.
//!
//! Every other relic crate depends on `relic-types`.
//!
//! # Key Types
//!
//! - [`Hash`]: Content-addressed identifier (BLAKE3 digest), used both for
//!   raw content and for metadata revisions
//! - [`Value`] / [`Metadata`]: Typed metadata attached to a revision
//! - [`Operation`] / [`CommandResult`]: Outcome of a mutating call
//! - [`Event`]: Entry of a repository's append-only event log
//! - [`ErrorKind`]: Error taxonomy shared by every layer, with stable codes

pub mod command;
pub mod error;
pub mod event;
pub mod hash;
pub mod value;

pub use command::{CommandResult, Operation};
pub use error::{ErrorKind, TypeError};
pub use event::Event;
pub use hash::Hash;
pub use value::{encode_metadata, Metadata, Value};
