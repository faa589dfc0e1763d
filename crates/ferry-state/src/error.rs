//! State and destination store error types.

/// Errors produced by [`StateBackend`](crate::StateBackend) and
/// [`DestinationStore`](crate::DestinationStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Backend(#[source] rusqlite::Error),

    /// `SQLite` failure with the operation that triggered it.
    #[error("{context}: {source}")]
    BackendContext {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored JSON could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row referenced by id does not exist.
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: i64 },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    pub(crate) fn backend(err: rusqlite::Error) -> Self {
        Self::Backend(err)
    }

    pub(crate) fn backend_context(context: &'static str, err: rusqlite::Error) -> Self {
        Self::BackendContext {
            context,
            source: err,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
