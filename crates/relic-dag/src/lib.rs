//! Revision history for relic.
//!
//! A [`Revision`] is an immutable, content-addressed metadata snapshot of a
//! piece of content. A [`RevisionTree`] is the DAG of every revision known
//! for one content hash, with its head (leaves), tail (roots) and unknown
//! parents derived on construction. Concurrent heads are reconciled by
//! [`RevisionTree::merge`].

pub mod error;
pub mod revision;
pub mod tree;

pub use error::{DagError, DagResult};
pub use revision::{Revision, RevisionBuilder};
pub use tree::RevisionTree;
