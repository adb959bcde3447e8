//! Transactional key-value storage for relic.
//!
//! Every durable piece of repository state (revision trees, the event log,
//! agent cursors, statistics) lives in named tables of a
//! [`TransactionalStore`]. Values are opaque bytes; [`codec`] turns typed
//! values into bytes with bincode.
//!
//! # Storage Backends
//!
//! - [`InMemoryStore`] -- `BTreeMap` tables behind one mutex, for tests and
//!   embedding
//!
//! # Design Rules
//!
//! 1. A transaction sees its own writes and nobody else's until commit.
//! 2. Dropping a transaction without committing rolls it back.
//! 3. Keys within a table are ordered bytewise.
//! 4. Sequence generators are per name, start at 1 and never repeat a
//!    committed value.

pub mod codec;
pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use traits::{in_transaction, LockMode, Row, Transaction, TransactionalStore};
