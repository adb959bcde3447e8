use thiserror::Error;

use relic_types::{ErrorKind, Hash};

use crate::locks::LockError;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content manager is closed")]
    Closed,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("a staging session is already open for {0:?}")]
    PendingStagingSession(Hash),

    #[error("no staging session for {0:?} (unknown or expired)")]
    StagingSessionNotFound(Hash),

    #[error("staging of {0:?} is already complete")]
    StagingCompleted(Hash),

    #[error("unknown content {0:?}")]
    UnknownContent(Hash),

    #[error("integrity check failed: expected {expected:?}, computed {actual:?}")]
    IntegrityCheckFailed { expected: Hash, actual: Hash },

    #[error("cannot write at position {position}: only {length} bytes are staged")]
    InvalidPosition { position: u64, length: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed | Self::Lock(LockError::Closed) => ErrorKind::RepositoryClosed,
            Self::PendingStagingSession(_) => ErrorKind::PendingStagingSession,
            Self::StagingSessionNotFound(_) => ErrorKind::StagingSessionNotFound,
            Self::StagingCompleted(_) => ErrorKind::StagingCompleted,
            Self::UnknownContent(_) => ErrorKind::UnknownContent,
            Self::IntegrityCheckFailed { .. } => ErrorKind::IntegrityCheckFailed,
            Self::InvalidPosition { .. } => ErrorKind::InvalidRequest,
            Self::Io(_) => ErrorKind::IoFailure,
        }
    }
}

pub type ContentResult<T> = Result<T, ContentError>;
