use relic_types::ErrorKind;

/// Errors from transactional store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored key does not have the expected layout.
    #[error("malformed key in table {table}: {reason}")]
    MalformedKey { table: String, reason: String },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed => ErrorKind::RepositoryClosed,
            Self::Io(_) => ErrorKind::IoFailure,
            Self::Serialization(_) | Self::MalformedKey { .. } => ErrorKind::Internal,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
