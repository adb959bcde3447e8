use std::fmt;

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Classification shared by every relic error type.
///
/// Each kind maps to a stable numeric code made of a status family
/// (HTTP-like) and a per-type suffix: `code = family * 100 + suffix`.
/// Boundary layers translate errors through this code only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request (bad position, bad argument).
    InvalidRequest,
    /// A requested item does not exist.
    NotFound,
    /// Content is unknown to the repository.
    UnknownContent,
    /// A revision references parents that are not present.
    UnknownRevision,
    /// The staging session is unknown or has expired.
    StagingSessionNotFound,
    /// Optimistic concurrency check failed (head mismatch).
    Conflict,
    /// A live staging session already exists for this content.
    PendingStagingSession,
    /// Staged bytes already match the target hash.
    StagingCompleted,
    /// Digest of the bytes does not match the declared hash.
    IntegrityCheckFailed,
    /// Disk or storage engine failure.
    IoFailure,
    /// Unexpected internal failure.
    Internal,
    /// The repository (or one of its components) has been closed.
    RepositoryClosed,
    /// A remote node could not be reached.
    UnreachableNode,
}

impl ErrorKind {
    /// Status family of this kind.
    pub fn family(self) -> u32 {
        match self {
            Self::InvalidRequest => 400,
            Self::NotFound
            | Self::UnknownContent
            | Self::UnknownRevision
            | Self::StagingSessionNotFound => 404,
            Self::Conflict | Self::PendingStagingSession | Self::StagingCompleted => 409,
            Self::IntegrityCheckFailed => 412,
            Self::IoFailure | Self::Internal => 500,
            Self::RepositoryClosed | Self::UnreachableNode => 503,
        }
    }

    fn suffix(self) -> u32 {
        match self {
            Self::InvalidRequest => 1,
            Self::NotFound => 1,
            Self::UnknownContent => 2,
            Self::UnknownRevision => 3,
            Self::StagingSessionNotFound => 4,
            Self::Conflict => 1,
            Self::PendingStagingSession => 2,
            Self::StagingCompleted => 3,
            Self::IntegrityCheckFailed => 1,
            Self::IoFailure => 1,
            Self::Internal => 2,
            Self::RepositoryClosed => 1,
            Self::UnreachableNode => 2,
        }
    }

    /// Stable numeric code.
    pub fn code(self) -> u32 {
        self.family() * 100 + self.suffix()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    const ALL: [ErrorKind; 13] = [
        ErrorKind::InvalidRequest,
        ErrorKind::NotFound,
        ErrorKind::UnknownContent,
        ErrorKind::UnknownRevision,
        ErrorKind::StagingSessionNotFound,
        ErrorKind::Conflict,
        ErrorKind::PendingStagingSession,
        ErrorKind::StagingCompleted,
        ErrorKind::IntegrityCheckFailed,
        ErrorKind::IoFailure,
        ErrorKind::Internal,
        ErrorKind::RepositoryClosed,
        ErrorKind::UnreachableNode,
    ];

    #[test]
    fn codes_are_unique() {
        let codes: HashSet<u32> = ALL.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn codes_embed_family() {
        for kind in ALL {
            assert_eq!(kind.code() / 100, kind.family());
        }
        assert_eq!(ErrorKind::Conflict.code(), 40901);
        assert_eq!(ErrorKind::RepositoryClosed.code(), 50301);
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(ErrorKind::UnknownContent.to_string(), "UnknownContent(40402)");
    }
}
