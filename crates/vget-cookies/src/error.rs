//! Cookie store error types.

use thiserror::Error;

/// Result type for cookie operations.
pub type CookieResult<T> = Result<T, CookieError>;

/// Errors that can occur in the cookie store.
#[derive(Debug, Error)]
pub enum CookieError {
    #[error("Cookie store configuration error: {0}")]
    ConfigError(String),

    #[error("No cookie bundle provisioned")]
    NoBundle,

    #[error("Cookie bundle invalid: {0}")]
    InvalidBundle(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Cookie lookup rate limit exceeded")]
    RateLimited,

    #[error("Storage error: {0}")]
    Storage(#[from] vget_storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CookieError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_bundle(msg: impl Into<String>) -> Self {
        Self::InvalidBundle(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }
}
