//! Queue error types.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Payload already pending: {0}")]
    Duplicate(String),

    #[error("Unknown or expired lease: {0}")]
    UnknownLease(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn duplicate(key: impl Into<String>) -> Self {
        Self::Duplicate(key.into())
    }

    pub fn unknown_lease(token: impl Into<String>) -> Self {
        Self::UnknownLease(token.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, QueueError::Duplicate(_))
    }
}
