use std::collections::BTreeSet;

use relic_dag::DagError;
use relic_store::StoreError;
use relic_types::{ErrorKind, Hash};

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("conflicting update of {content:?}: {reason}")]
    Conflict { content: Hash, reason: String },

    #[error("unknown content {0:?}")]
    UnknownContent(Hash),

    #[error("revision tree of {content:?} references {} unknown revisions", missing.len())]
    UnknownRevision {
        content: Hash,
        missing: BTreeSet<Hash>,
    },

    #[error("revision {revision:?} of {content:?} does not match its own hash")]
    ForgedRevision { content: Hash, revision: Hash },

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::UnknownContent(_) => ErrorKind::UnknownContent,
            Self::UnknownRevision { .. } => ErrorKind::UnknownRevision,
            Self::ForgedRevision { .. } => ErrorKind::InvalidRequest,
            Self::Dag(e) => e.kind(),
            Self::Store(e) => e.kind(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
