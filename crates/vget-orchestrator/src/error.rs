//! Orchestrator error types.

use thiserror::Error;

use vget_models::ErrorKind;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Caller-visible orchestration errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl OrchestratorError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// The taxonomy kind callers see.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::InvalidInput(_) => ErrorKind::InvalidInput,
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::Conflict(_) => ErrorKind::Conflict,
            OrchestratorError::Unavailable(_) => ErrorKind::Internal,
        }
    }
}

impl From<vget_jobstore::StoreError> for OrchestratorError {
    fn from(e: vget_jobstore::StoreError) -> Self {
        use vget_jobstore::StoreError;
        match e {
            StoreError::NotFound(id) => OrchestratorError::NotFound(id),
            StoreError::Conflict(msg) => OrchestratorError::Conflict(msg),
            other => OrchestratorError::Unavailable(other.to_string()),
        }
    }
}

impl From<vget_queue::QueueError> for OrchestratorError {
    fn from(e: vget_queue::QueueError) -> Self {
        OrchestratorError::Unavailable(e.to_string())
    }
}

impl From<vget_models::UrlError> for OrchestratorError {
    fn from(e: vget_models::UrlError) -> Self {
        OrchestratorError::InvalidInput(e.to_string())
    }
}
