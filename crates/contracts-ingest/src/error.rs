//! Error types for contract ingestion

use std::path::PathBuf;

use contracts_common::CommonError;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Another run already holds the lock. The orchestrator turns this into a
    /// no-op outcome; it only escapes from direct `RunLock` use.
    #[error("Lock at {} is held by another run", path.display())]
    LockContention { path: PathBuf },

    #[error("Lock error: {0}")]
    Lock(#[source] std::io::Error),

    /// Transport failure. Together with `HttpStatus` this is the fetch error
    /// that aborts a listing or fails one snapshot.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GET {url} returned {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl SyncError {
    pub fn decode(msg: impl Into<String>) -> Self {
        SyncError::Decode(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        SyncError::Parse(msg.into())
    }

    /// Transient network failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SyncError::HttpStatus { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            },
            _ => false,
        }
    }
}

impl From<csv::Error> for SyncError {
    fn from(err: csv::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}
