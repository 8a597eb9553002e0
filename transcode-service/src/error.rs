//! Error types for the transcode service
//!
//! One taxonomy for the whole job substrate; the retry policy for each kind
//! lives with the caller (worker, scheduler, webhook engine).

use thiserror::Error;

/// Result type for transcode-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Target entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Compare-and-swap precondition unmet (e.g. status already advanced)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Retriable I/O failure (blob store, webhook target, encoder launch)
    #[error("transient i/o error: {0}")]
    TransientIo(String),

    /// Non-retriable I/O failure (bad key, disk full)
    #[error("permanent i/o error: {0}")]
    PermanentIo(String),

    /// The encoder subprocess exited non-zero; carries the stderr tail
    #[error("encoder failed: {message}")]
    EncoderFailure { message: String, stderr_tail: String },

    /// Probe could not parse the media
    #[error("invalid media: {0}")]
    InvalidMedia(String),

    /// A quota counter rejected the operation
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Context cancellation; maps to the `cancelled` terminal state
    #[error("cancelled")]
    Cancelled,

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),

    /// Cache operation failed
    #[error("cache error: {0}")]
    Cache(String),

    /// Internal invariant broken
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn encoder(message: impl Into<String>, stderr_tail: impl Into<String>) -> Self {
        AppError::EncoderFailure {
            message: message.into(),
            stderr_tail: stderr_tail.into(),
        }
    }

    /// Whether a bounded retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientIo(_) | AppError::Cache(_))
    }

    /// Whether this error came from cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// The error string persisted into `job.error_msg`.
    pub fn job_message(&self) -> String {
        match self {
            AppError::EncoderFailure {
                message,
                stderr_tail,
            } if !stderr_tail.is_empty() => format!("{message}: {stderr_tail}"),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                AppError::PermanentIo(err.to_string())
            }
            _ => AppError::TransientIo(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Cache(err.to_string())
    }
}
