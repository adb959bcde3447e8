//! Durable repository state on top of a transactional store.
//!
//! This crate provides:
//! - [`RevisionManager`]: compare-and-swap updates of each content's
//!   revision tree, inferring the [`Operation`](relic_types::Operation) a
//!   change amounts to
//! - [`EventLog`]: the append-only, sequence-numbered log of applied changes
//! - [`CursorTable`]: the last event each agent has processed
//!
//! Every operation takes an open [`Transaction`](relic_store::Transaction),
//! so a revision change and its event are committed atomically.

pub mod cursor;
pub mod error;
pub mod events;
pub mod revisions;

pub use cursor::CursorTable;
pub use error::{LedgerError, LedgerResult};
pub use events::EventLog;
pub use revisions::RevisionManager;
