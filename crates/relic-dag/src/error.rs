//! Error types for revisions and revision trees.

use relic_types::{ErrorKind, Hash};

/// Errors that can occur while building or querying a revision tree.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// A requested revision is not part of the tree.
    #[error("revision not found: {0:?}")]
    NotFound(Hash),

    /// A tree needs at least one revision.
    #[error("revision tree cannot be empty")]
    Empty,

    /// Revisions of a tree must all describe the same content.
    #[error("content mismatch: tree is for {expected:?}, revision is for {actual:?}")]
    ContentMismatch {
        /// Content of the tree.
        expected: Hash,
        /// Content of the offending revision.
        actual: Hash,
    },

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DagError {
    /// Stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::UnknownRevision,
            Self::Empty | Self::ContentMismatch { .. } => ErrorKind::InvalidRequest,
            Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience alias for DAG results.
pub type DagResult<T> = Result<T, DagError>;
