//! Error types for promptbox-core

use thiserror::Error;

/// Result type alias using promptbox-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Retry policy class for a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur in promptbox-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected before any write (bad id, oversized field, bad checksum)
    #[error("Validation error: {0}")]
    Validation(String),

    /// SQLite error, surfaced unchanged
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport failure talking to the remote store
    #[error("Network error: {0}")]
    Network(String),

    /// Remote rejected the credentials; needs re-authentication upstream
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Remote returned an error response
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Destructive action attempted without the typed confirmation value
    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(message.into()),
            _ => Self::Remote {
                status,
                message: message.into(),
            },
        }
    }

    /// Classify error for queue retry policy.
    pub const fn retry_class(&self) -> RetryClass {
        match self {
            Self::Network(_) => RetryClass::Retryable,
            Self::Unauthorized(_) => RetryClass::ReauthRequired,
            Self::Remote { status, .. } => match *status {
                401 | 403 => RetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 | 500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            _ => RetryClass::Permanent,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => Self::remote(status.as_u16(), error.to_string()),
            None => Self::Network(error.to_string()),
        }
    }
}
