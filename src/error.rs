//! Error types for Coldvault

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Registry miss. Callers treat this as "no prior record".
    #[error("Not found: {0}")]
    NotFound(String),

    /// The idempotency key is already bound to a different change type.
    #[error("Invalid request id {request_id}: already recorded as {existing}")]
    InvalidRequestId { request_id: String, existing: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Walk error: {0}")]
    Walk(String),

    #[error("S3 error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Whether this error is the distinguished cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Whether this error is a recoverable registry miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("S3 response missing {0}")]
    MissingField(&'static str),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}
