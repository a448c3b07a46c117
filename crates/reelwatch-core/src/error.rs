use std::path::PathBuf;

use thiserror::Error;

/// Application-wide error types for reelwatch.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (HTTP 429).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// The remote service answered with a non-success status.
    #[error("HTTP {status_code}: {message}")]
    HttpError { status_code: u16, message: String },

    /// The feed body could not be parsed.
    #[error("Feed parse error: {0}")]
    FeedParseError(String),

    /// An item lacks the metadata needed for acquisition.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// The dedup ledger could not be read or written.
    #[error("Ledger persistence error at {}: {source}", path.display())]
    PersistenceError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A transient failure persisted through every allowed attempt.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<AppError> },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::HttpError { status_code, .. } => {
                *status_code == 408 || *status_code == 429 || *status_code >= 500
            }
            _ => false,
        }
    }

    /// Builds an `HttpError` from a status code and response body.
    pub fn http(status_code: u16, message: impl Into<String>) -> Self {
        if status_code == 429 {
            return AppError::RateLimitExceeded;
        }
        AppError::HttpError {
            status_code,
            message: message.into(),
        }
    }
}
