//! Failure taxonomy surfaced on failed jobs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure kind.
///
/// Inner components return their own typed errors; the worker maps them to
/// one of these kinds before a job is marked failed. Callers see the kind
/// plus a short message; full context goes to logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected at submit; no job was created
    InvalidInput,
    /// Job id not present
    NotFound,
    /// State transition disallowed
    Conflict,
    /// Extractor reported login-gated content
    AuthRequired,
    /// Removed, private or region-blocked
    SourceUnavailable,
    /// Non-zero extractor exit without a stronger signal
    ExtractorTransient,
    /// Object store or filesystem failed
    StorageUnavailable,
    /// Write rejected due to space
    StorageQuota,
    /// Extractor or upload exceeded its bound
    Timeout,
    /// Explicit cancellation
    Cancelled,
    /// Unclassified
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::ExtractorTransient => "extractor_transient",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::StorageQuota => "storage_quota",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether the queue should redeliver a job that failed with this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ExtractorTransient
                | ErrorKind::StorageUnavailable
                | ErrorKind::Timeout
                | ErrorKind::AuthRequired
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure recorded on a job in the `failed` state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    /// Classified kind
    pub kind: ErrorKind,
    /// Short human-readable message
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::ExtractorTransient.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::StorageUnavailable.is_retryable());
        assert!(!ErrorKind::SourceUnavailable.is_retryable());
        assert!(!ErrorKind::StorageQuota.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn failure_serde() {
        let f = JobFailure::new(ErrorKind::SourceUnavailable, "video removed");
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["kind"], "source_unavailable");
    }
}
