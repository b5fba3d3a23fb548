//! Error taxonomy for the daemon core.
//!
//! Every backend-touching function returns [`Result`]. Handlers decide per
//! operation whether an error degrades to an empty result (transient backend
//! trouble) or is reported to the client (protocol errors, back-pressure).

use thiserror::Error;

/// Main error type for daemon operations.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// No pooled connection became available within the acquisition timeout.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The pool has been closed for shutdown.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The extraction queue is at capacity; the job was not accepted.
    #[error("extraction queue is full")]
    QueueFull,

    /// A statement ran past the statement timeout and was interrupted.
    #[error("statement timed out")]
    StatementTimeout,

    /// An operation exceeded its overall deadline.
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// Schema is missing, outdated, or a migration failed.
    #[error("schema error: {0}")]
    Schema(String),

    /// Malformed request or missing/invalid fields.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Repository identification failed (git not runnable, timed out).
    #[error("repository resolution failed: {0}")]
    Resolve(String),

    /// LLM extraction failed (transport, HTTP status, or response shape).
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl DaemonError {
    /// Stable machine-readable code carried in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PoolExhausted | Self::PoolClosed => "unavailable",
            Self::QueueFull => "queue_full",
            Self::StatementTimeout | Self::Timeout(_) => "timeout",
            Self::InvalidRequest(_) | Self::Json(_) => "invalid_request",
            Self::UnknownMethod(_) => "unknown_method",
            Self::Database(_)
            | Self::Schema(_)
            | Self::Resolve(_)
            | Self::Extraction(_)
            | Self::Io(_)
            | Self::Task(_) => "internal",
        }
    }

    /// Transient backend errors are recovered locally by returning an
    /// empty or null result to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted
                | Self::PoolClosed
                | Self::StatementTimeout
                | Self::Timeout(_)
                | Self::Database(_)
                | Self::Task(_)
        )
    }

    /// Map a rusqlite error, turning an interrupt into [`DaemonError::StatementTimeout`].
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Self::StatementTimeout
            }
            other => Self::Database(other),
        }
    }
}

impl From<rusqlite::Error> for DaemonError {
    fn from(err: rusqlite::Error) -> Self {
        Self::from_sqlite(err)
    }
}

impl From<tokio::task::JoinError> for DaemonError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
