//! The job entity and its lifecycle fields.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::failure::JobFailure;
use crate::options::JobOptions;

/// Unique identifier for a download job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle status.
///
/// Transitions form a DAG: `queued` feeds `running` (or `cancelled`),
/// `running` ends in `succeeded`, `failed` or `cancelled`, and `failed`
/// may be re-queued by an operator retry. Terminal rows are immutable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata extracted from the platform, populated after extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    /// Upload date as reported by the platform (YYYYMMDD)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
}

/// A stored artifact produced by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    /// Key under the storage backend
    pub storage_key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// MIME type
    pub content_type: String,
}

/// Artifacts produced by a successful job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobArtifacts {
    /// Primary media file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Artifact>,
    /// Subtitle tracks keyed by language tag
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subtitles: BTreeMap<String, Artifact>,
    /// Thumbnail image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Artifact>,
}

impl JobArtifacts {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.subtitles.is_empty() && self.thumbnail.is_none()
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// A download job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID, assigned at creation
    pub id: JobId,

    /// Canonicalized source URL
    pub source_url: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// Percent complete, monotone while running
    #[serde(default)]
    pub progress: f64,

    /// Download options
    #[serde(default)]
    pub options: JobOptions,

    /// Platform metadata, absent until extraction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,

    /// Stored artifacts
    #[serde(default)]
    pub artifacts: JobArtifacts,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// First transition into running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// First transition into a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Times execution has begun
    #[serde(default)]
    pub attempts: u32,

    /// Attempt ceiling
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Present only when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,

    /// Opaque caller identity, retained for auditing
    pub caller: String,
}

impl Job {
    /// Create a new queued job.
    pub fn new(source_url: impl Into<String>, options: JobOptions, caller: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            source_url: source_url.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            options,
            metadata: None,
            artifacts: JobArtifacts::default(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            attempts: 0,
            max_attempts: default_max_attempts(),
            error: None,
            caller: caller.into(),
        }
    }

    /// Override the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether an operator retry is currently allowed.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_creation_defaults() {
        let job = Job::new("https://host.example/watch?v=abc", JobOptions::default(), "caller-1");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.artifacts.is_empty());
        assert!(job.metadata.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn job_serde_roundtrip() {
        let mut job = Job::new("https://host.example/v/1", JobOptions::default(), "svc");
        job.artifacts.video = Some(Artifact {
            storage_key: format!("jobs/{}/video.mp4", job.id),
            size_bytes: 1024,
            content_type: "video/mp4".to_string(),
        });

        let json = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.artifacts.video, job.artifacts.video);
    }

    #[test]
    fn retry_allowed_only_when_failed_with_budget() {
        let mut job = Job::new("https://host.example/v/1", JobOptions::default(), "svc");
        assert!(!job.can_retry());

        job.status = JobStatus::Failed;
        job.attempts = 2;
        assert!(job.can_retry());

        job.attempts = 3;
        assert!(!job.can_retry());
    }
}
