//! Extractor error types and failure classification.

use thiserror::Error;

/// Result type for extractor operations.
pub type ExtractorResult<T> = Result<T, ExtractorError>;

/// Errors that can occur while running the extraction tool.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("Content requires authentication: {0}")]
    AuthRequired(String),

    #[error("Source permanently unavailable: {0}")]
    Unavailable(String),

    #[error("Extractor failed: {message}")]
    Failed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Extractor timed out after {0} seconds")]
    Timeout(u64),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Expected output missing: {0}")]
    OutputMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtractorError {
    pub fn failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::Failed {
            message: message.into(),
            exit_code,
        }
    }

    pub fn output_missing(msg: impl Into<String>) -> Self {
        Self::OutputMissing(msg.into())
    }
}

/// Patterns in extractor stderr that mean the content is login-gated and a
/// cookie jar could unlock it.
const AUTH_PATTERNS: &[&str] = &[
    "sign in to confirm",
    "login required",
    "please log in",
    "use --cookies",
    "cookies are no longer valid",
    "account has been",
    "this video is only available to members",
    "join this channel",
    "age-restricted",
    "confirm your age",
];

/// Patterns that mean no retry or credential will ever help.
const UNAVAILABLE_PATTERNS: &[&str] = &[
    "video unavailable",
    "video is unavailable",
    "video not available",
    "private video",
    "video is private",
    "has been removed",
    "was deleted",
    "no longer available",
    "not available in your country",
    "blocked in your country",
    "copyright claim",
    "copyright grounds",
    "account associated with this video has been terminated",
];

/// Map a non-zero extractor exit to a typed error.
///
/// Authentication and permanent-unavailability signals are recognized from
/// the error text; everything else is transient by default.
pub fn classify_failure(stderr: &str, exit_code: Option<i32>) -> ExtractorError {
    let haystack = stderr.to_lowercase();

    // Auth wins over unavailability: gated content often reports both
    // flavors of message and a cookie rotation may still unlock it.
    if AUTH_PATTERNS.iter().any(|p| haystack.contains(p)) {
        return ExtractorError::AuthRequired(last_error_line(stderr));
    }

    if UNAVAILABLE_PATTERNS.iter().any(|p| haystack.contains(p)) {
        return ExtractorError::Unavailable(last_error_line(stderr));
    }

    ExtractorError::failed(last_error_line(stderr), exit_code)
}

/// The most recent ERROR line, or the last non-empty line as a fallback.
fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("unknown error")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_recognized() {
        let err = classify_failure(
            "ERROR: [host] abc: Sign in to confirm you're not a bot",
            Some(1),
        );
        assert!(matches!(err, ExtractorError::AuthRequired(_)));

        let err = classify_failure("ERROR: This video is age-restricted", Some(1));
        assert!(matches!(err, ExtractorError::AuthRequired(_)));
    }

    #[test]
    fn permanent_unavailability_is_recognized() {
        for text in [
            "ERROR: [host] abc: Video unavailable",
            "ERROR: [host] abc: Private video",
            "ERROR: This video has been removed by the uploader",
            "ERROR: The uploader has not made this video available in your country",
        ] {
            let err = classify_failure(text, Some(1));
            assert!(matches!(err, ExtractorError::Unavailable(_)), "{}", text);
        }
    }

    #[test]
    fn unknown_failures_default_to_transient() {
        let err = classify_failure("ERROR: Connection reset by peer", Some(1));
        assert!(matches!(err, ExtractorError::Failed { .. }));
    }

    #[test]
    fn last_error_line_is_surfaced() {
        let stderr = "WARNING: something\nERROR: first\nERROR: the real one";
        match classify_failure(stderr, Some(1)) {
            ExtractorError::Failed { message, .. } => {
                assert_eq!(message, "ERROR: the real one")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
