use thiserror::Error;

use relic_agent::AgentError;
use relic_content::ContentError;
use relic_dag::DagError;
use relic_ledger::LedgerError;
use relic_store::StoreError;
use relic_types::ErrorKind;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository {0} is closed")]
    Closed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed(_) => ErrorKind::RepositoryClosed,
            Self::InvalidRequest(_) | Self::Config(_) => ErrorKind::InvalidRequest,
            Self::Io(_) => ErrorKind::IoFailure,
            Self::Json(_) => ErrorKind::Internal,
            Self::Ledger(e) => e.kind(),
            Self::Dag(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Content(e) => e.kind(),
            Self::Agent(e) => e.kind(),
        }
    }

    /// Stable numeric code of the error, for boundary layers.
    pub fn code(&self) -> u32 {
        self.kind().code()
    }
}

/// Agents see repository failures through their kind, which decides
/// whether the agent stops, fails or retries.
impl From<RepositoryError> for AgentError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Agent(inner) => inner,
            other => AgentError::new(other.kind(), other),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use relic_types::Hash;

    use super::*;

    #[test]
    fn codes_follow_kind() {
        assert_eq!(RepositoryError::Closed("r".into()).code(), 50301);
        let conflict = RepositoryError::Ledger(LedgerError::Conflict {
            content: Hash::of(b"x"),
            reason: "head moved".into(),
        });
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert_eq!(conflict.code(), 40901);
    }

    #[test]
    fn closed_repository_stops_agents() {
        let err: AgentError = RepositoryError::Closed("r".into()).into();
        assert!(err.is_unavailable());
        let err: AgentError = RepositoryError::InvalidRequest("bad".into()).into();
        assert!(!err.is_unavailable());
    }
}
