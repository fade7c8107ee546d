//! Error taxonomy for the terminal.
//!
//! Network and server failures come from the backend client and are always
//! recoverable (the order stays unsynced). Storage failures on the local
//! database are the one class the operator must see. Parse failures cover
//! malformed payloads from the push channel and the REST API.

use thiserror::Error;

/// Failure talking to the backend REST API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Backend unreachable, connection refused, or request timed out.
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with a non-2xx status.
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    Parse(#[from] ParseError),

    /// Request rejected before it was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Local database failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("order {0} not found")]
    OrderNotFound(i64),

    /// `synced` only ever moves from 0 to 1.
    #[error("order {0}: synced flag cannot go back to unsynced")]
    SyncedRegression(i64),

    #[error("order {0} is already being submitted")]
    AlreadyClaimed(i64),
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StorageError::LockPoisoned
    }
}

/// Malformed payload (push channel message or API body).
#[derive(Debug, Error)]
#[error("malformed payload: {source}")]
pub struct ParseError {
    #[from]
    source: serde_json::Error,
}

/// Failure of a receipt printer or cash drawer action.
#[derive(Debug, Error)]
pub enum PeripheralError {
    #[error("invalid peripheral address {0}")]
    InvalidAddress(String),

    #[error("peripheral io: {0}")]
    Io(#[from] std::io::Error),

    #[error("peripheral timed out after {0}ms")]
    Timeout(u128),

    #[error("drawer kick rate-limited, wait {0}ms")]
    RateLimited(u128),
}

/// Top-level error surfaced to the operator-facing layer.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("invalid order: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
pub type ApiResult<T> = Result<T, ApiError>;
