//! Worker error aggregation and the failure classifier.

use thiserror::Error;

use vget_models::{ErrorKind, JobFailure};

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Everything that can go wrong while executing one job.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Upload timed out after {0} seconds")]
    UploadTimeout(u64),

    #[error("Credential store not configured but job requires credentials")]
    CredentialsUnavailable,

    #[error("Job cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] vget_storage::StorageError),

    #[error("Job store error: {0}")]
    Store(#[from] vget_jobstore::StoreError),

    #[error("Cookie error: {0}")]
    Cookies(#[from] vget_cookies::CookieError),

    #[error("Extractor error: {0}")]
    Extractor(#[from] vget_extractor::ExtractorError),

    #[error("Queue error: {0}")]
    Queue(#[from] vget_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    /// Map this error to the caller-visible failure taxonomy.
    ///
    /// The worker is the sole classifier: inner components surface typed
    /// errors, this is where they become job failure kinds and, through
    /// [`ErrorKind::is_retryable`], queue policy.
    pub fn classify(&self) -> ErrorKind {
        use vget_extractor::ExtractorError;
        use vget_storage::StorageError;

        match self {
            WorkerError::Cancelled => ErrorKind::Cancelled,
            WorkerError::UploadTimeout(_) => ErrorKind::Timeout,
            WorkerError::UploadFailed(_) => ErrorKind::StorageUnavailable,

            WorkerError::Extractor(e) => match e {
                ExtractorError::AuthRequired(_) => ErrorKind::AuthRequired,
                ExtractorError::Unavailable(_) => ErrorKind::SourceUnavailable,
                ExtractorError::Timeout(_) => ErrorKind::Timeout,
                ExtractorError::Cancelled => ErrorKind::Cancelled,
                ExtractorError::Failed { .. } => ErrorKind::ExtractorTransient,
                ExtractorError::YtDlpNotFound
                | ExtractorError::OutputMissing(_)
                | ExtractorError::Io(_)
                | ExtractorError::Json(_) => ErrorKind::Internal,
            },

            WorkerError::Storage(e) => match e {
                StorageError::QuotaExceeded(_) => ErrorKind::StorageQuota,
                _ => ErrorKind::StorageUnavailable,
            },

            // Cookie trouble means the gated content cannot be unlocked
            // right now; treated like an auth failure for retry purposes.
            WorkerError::Cookies(_) | WorkerError::CredentialsUnavailable => {
                ErrorKind::AuthRequired
            }

            WorkerError::Store(_) | WorkerError::Queue(_) | WorkerError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Build the failure recorded on the job row.
    pub fn to_failure(&self) -> JobFailure {
        JobFailure::new(self.classify(), short_message(&self.to_string()))
    }
}

/// Callers get one line, logs get the rest.
fn short_message(full: &str) -> String {
    let line = full.lines().next().unwrap_or(full);
    if line.len() > 200 {
        let mut end = 200;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &line[..end])
    } else {
        line.to_string()
    }
}
