use std::fmt;

use relic_types::ErrorKind;

/// Errors produced by an agent or reported to it by its capabilities.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A capability failed. The kind decides how the agent reacts.
    #[error("{kind}: {message}")]
    Failed { kind: ErrorKind, message: String },

    /// `start` was called on an agent that already has a worker thread.
    #[error("agent {0} is already started")]
    AlreadyStarted(String),

    /// The worker thread could not be spawned.
    #[error("failed to spawn agent thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl AgentError {
    pub fn new(kind: ErrorKind, message: impl fmt::Display) -> Self {
        Self::Failed {
            kind,
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Failed { kind, .. } => *kind,
            Self::AlreadyStarted(_) => ErrorKind::InvalidRequest,
            Self::Spawn(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` for expected unavailability: a closed or unreachable
    /// source or target. Such failures stop an agent instead of failing it.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RepositoryClosed | ErrorKind::UnreachableNode
        )
    }
}

/// Convenience alias used throughout the agent crate.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailability_follows_kind() {
        assert!(AgentError::new(ErrorKind::RepositoryClosed, "closed").is_unavailable());
        assert!(AgentError::new(ErrorKind::UnreachableNode, "gone").is_unavailable());
        assert!(!AgentError::new(ErrorKind::IoFailure, "disk").is_unavailable());
        assert!(!AgentError::AlreadyStarted("index".into()).is_unavailable());
    }

    #[test]
    fn message_carries_kind() {
        let err = AgentError::new(ErrorKind::Conflict, "head moved");
        assert_eq!(err.to_string(), "Conflict(40901): head moved");
    }
}
