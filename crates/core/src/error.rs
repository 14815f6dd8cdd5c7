//! Unified error types for capsync.
//!
//! Every variant renders with a stable machine-readable code prefix so
//! failures recorded on queue entries and control replies stay greppable.

use tokio_rusqlite::rusqlite;

/// Unified error types for the capsync engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an unparsable stored method).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The queue store could not commit an add, update or remove.
    #[error("QUEUE_PERSISTENCE_ERROR: {0}")]
    QueuePersistence(String),

    /// No queue entry with the given id.
    #[error("NOT_FOUND: queue entry {0}")]
    NotFound(i64),

    /// A queue entry status change that the lifecycle forbids.
    #[error("INVALID_TRANSITION: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// No response was received (connection refused, DNS, reset...).
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// A network attempt exceeded its deadline.
    #[error("NETWORK_TIMEOUT: {0}")]
    Timeout(String),

    /// Response body exceeded the configured limit.
    #[error("FETCH_TOO_LARGE: {0}")]
    TooLarge(String),

    /// JSON encoding or decoding failed.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// The worker inbox is closed.
    #[error("WORKER_STOPPED")]
    WorkerStopped,
}

impl Error {
    /// Whether the failure means no response arrived from the network.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
