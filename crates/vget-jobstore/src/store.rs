//! The job store contract and the shared transition logic.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vget_models::{Job, JobArtifacts, JobFailure, JobId, JobMetadata, JobStatus};

use crate::error::{StoreError, StoreResult};

/// Fields a transition may set alongside the status change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPatch {
    /// Set `started_at` (first write wins)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Increment the attempt counter
    #[serde(default)]
    pub increment_attempts: bool,
    /// Overwrite progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Attach extracted metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    /// Attach produced artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<JobArtifacts>,
    /// Record a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    /// Clear a previously recorded failure (operator retry)
    #[serde(default)]
    pub clear_error: bool,
}

impl TransitionPatch {
    /// Patch for `queued → running`: stamp `started_at`, count the attempt.
    pub fn begin_attempt() -> Self {
        Self {
            started_at: Some(Utc::now()),
            increment_attempts: true,
            ..Default::default()
        }
    }

    /// Patch for a crash resume (`running → running`): refresh `started_at`
    /// without touching the attempt counter.
    pub fn resume_attempt() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Patch for `running → succeeded`.
    pub fn succeed(metadata: JobMetadata, artifacts: JobArtifacts) -> Self {
        Self {
            progress: Some(100.0),
            metadata: Some(metadata),
            artifacts: Some(artifacts),
            ..Default::default()
        }
    }

    /// Patch for a terminal failure.
    pub fn fail(error: JobFailure) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Patch for an operator retry (`failed → queued`).
    pub fn requeue() -> Self {
        Self {
            clear_error: true,
            ..Default::default()
        }
    }
}

/// Apply a guarded transition to a job row.
///
/// This is the one place lifecycle invariants are enforced; both backends
/// call it under their respective per-row serialization. Repeating a
/// transition that already committed is a no-op returning the current row.
pub fn apply_transition(
    job: &Job,
    from_states: &[JobStatus],
    to_state: JobStatus,
    patch: &TransitionPatch,
) -> StoreResult<Option<Job>> {
    if !from_states.contains(&job.status) {
        // A replayed terminal transition lands here after the first commit:
        // same target, source state already consumed. Report success without
        // rewriting so redeliveries converge. Non-terminal repeats stay
        // conflicts; a second `queued -> running` means another worker owns
        // the row.
        if job.status == to_state && to_state.is_terminal() {
            return Ok(None);
        }
        return Err(StoreError::conflict(format!(
            "job {} is {}, expected one of {:?}",
            job.id,
            job.status,
            from_states.iter().map(|s| s.as_str()).collect::<Vec<_>>()
        )));
    }

    let mut next = job.clone();
    next.status = to_state;

    if patch.increment_attempts {
        if job.attempts >= job.max_attempts {
            return Err(StoreError::conflict(format!(
                "job {} exhausted its {} attempts",
                job.id, job.max_attempts
            )));
        }
        next.attempts += 1;
    }

    if let Some(started_at) = patch.started_at {
        next.started_at = Some(started_at);
    }
    if let Some(metadata) = &patch.metadata {
        next.metadata = Some(metadata.clone());
    }
    if let Some(artifacts) = &patch.artifacts {
        next.artifacts = artifacts.clone();
    }
    if patch.clear_error {
        next.error = None;
    }
    if let Some(error) = &patch.error {
        next.error = Some(error.clone());
    }
    if let Some(progress) = patch.progress {
        next.progress = progress.clamp(0.0, 100.0);
    }

    // Terminal bookkeeping: first terminal transition stamps finished_at;
    // progress pins to 100 on success and stays below otherwise.
    if to_state.is_terminal() {
        if next.finished_at.is_none() {
            next.finished_at = Some(Utc::now());
        }
        if to_state == JobStatus::Succeeded {
            next.progress = 100.0;
        } else {
            next.progress = next.progress.min(99.0);
        }
    } else {
        next.progress = next.progress.min(99.0);
        if to_state == JobStatus::Queued {
            next.finished_at = None;
        }
    }

    Ok(Some(next))
}

/// Filter for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs in this status
    pub status: Option<JobStatus>,
}

/// A page request for job listings.
#[derive(Debug, Clone)]
pub struct JobPage {
    /// Maximum rows to return
    pub limit: usize,
    /// Opaque cursor from a previous page
    pub cursor: Option<String>,
}

impl Default for JobPage {
    fn default() -> Self {
        Self {
            limit: 50,
            cursor: None,
        }
    }
}

/// Cursor over the `(created_at desc, id desc)` ordering.
pub(crate) fn encode_cursor(created_at: DateTime<Utc>, id: &JobId) -> String {
    let raw = format!("{}:{}", created_at.timestamp_millis(), id);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

pub(crate) fn decode_cursor(cursor: &str) -> StoreResult<(i64, String)> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    let raw =
        String::from_utf8(bytes).map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
    let (millis, id) = raw
        .split_once(':')
        .ok_or_else(|| StoreError::InvalidCursor("missing separator".to_string()))?;
    let millis: i64 = millis
        .parse()
        .map_err(|_| StoreError::InvalidCursor("bad timestamp".to_string()))?;
    Ok((millis, id.to_string()))
}

/// Durable persistence of jobs and their lifecycle fields.
///
/// `transition` is the single contract for all lifecycle changes; no other
/// update path exists. Concurrent transitions on the same id are serialized
/// at the store layer.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job; returns its id.
    async fn create(&self, job: Job) -> StoreResult<JobId>;

    /// Load a job by id.
    async fn load(&self, id: &JobId) -> StoreResult<Job>;

    /// List jobs, newest first, with stable cursor pagination.
    async fn list(&self, filter: JobFilter, page: JobPage)
        -> StoreResult<(Vec<Job>, Option<String>)>;

    /// Atomic guarded state change. Returns the row as committed.
    async fn transition(
        &self,
        id: &JobId,
        from_states: &[JobStatus],
        to_state: JobStatus,
        patch: TransitionPatch,
    ) -> StoreResult<Job>;

    /// Bounded progress update: accepted only while running and only for
    /// monotone increases; capped below 100 until success.
    async fn touch_progress(&self, id: &JobId, percent: f64) -> StoreResult<()>;

    /// Flag a running job for cancellation. Workers poll this at their
    /// checkpoints.
    async fn request_cancel(&self, id: &JobId) -> StoreResult<()>;

    /// Whether cancellation has been requested for the job.
    async fn cancel_requested(&self, id: &JobId) -> StoreResult<bool>;

    /// Drop the cancel flag once the job reaches a terminal state.
    async fn clear_cancel(&self, id: &JobId) -> StoreResult<()>;

    /// Whether the backend is reachable and writable.
    async fn probe(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use vget_models::JobOptions;

    fn job() -> Job {
        Job::new("https://host.example/v/1", JobOptions::default(), "svc")
    }

    #[test]
    fn begin_attempt_moves_to_running() {
        let j = job();
        let next = apply_transition(
            &j,
            &[JobStatus::Queued],
            JobStatus::Running,
            &TransitionPatch::begin_attempt(),
        )
        .unwrap()
        .expect("row changed");

        assert_eq!(next.status, JobStatus::Running);
        assert_eq!(next.attempts, 1);
        assert!(next.started_at.is_some());
    }

    #[test]
    fn wrong_source_state_is_conflict() {
        let j = job();
        let err = apply_transition(
            &j,
            &[JobStatus::Running],
            JobStatus::Succeeded,
            &TransitionPatch::default(),
        )
        .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn replay_after_commit_is_noop() {
        let mut j = job();
        j.status = JobStatus::Succeeded;
        j.progress = 100.0;

        let result = apply_transition(
            &j,
            &[JobStatus::Running],
            JobStatus::Succeeded,
            &TransitionPatch::default(),
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn success_pins_progress_and_finished_at() {
        let mut j = job();
        j.status = JobStatus::Running;
        j.progress = 87.0;

        let next = apply_transition(
            &j,
            &[JobStatus::Running],
            JobStatus::Succeeded,
            &TransitionPatch::succeed(JobMetadata::default(), JobArtifacts::default()),
        )
        .unwrap()
        .unwrap();

        assert_eq!(next.progress, 100.0);
        assert!(next.finished_at.is_some());
    }

    #[test]
    fn non_success_terminal_caps_progress() {
        let mut j = job();
        j.status = JobStatus::Running;
        j.progress = 99.0;

        let next = apply_transition(
            &j,
            &[JobStatus::Running],
            JobStatus::Cancelled,
            &TransitionPatch::default(),
        )
        .unwrap()
        .unwrap();

        assert!(next.progress <= 99.0);
        assert!(next.finished_at.is_some());
    }

    #[test]
    fn attempts_cannot_exceed_ceiling() {
        let mut j = job();
        j.attempts = 3;

        let err = apply_transition(
            &j,
            &[JobStatus::Queued],
            JobStatus::Running,
            &TransitionPatch::begin_attempt(),
        )
        .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn requeue_clears_error_and_finished_at() {
        let mut j = job();
        j.status = JobStatus::Failed;
        j.attempts = 1;
        j.finished_at = Some(Utc::now());
        j.error = Some(JobFailure::new(
            vget_models::ErrorKind::ExtractorTransient,
            "boom",
        ));

        let next = apply_transition(
            &j,
            &[JobStatus::Failed],
            JobStatus::Queued,
            &TransitionPatch::requeue(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(next.status, JobStatus::Queued);
        assert!(next.error.is_none());
        assert!(next.finished_at.is_none());
        assert_eq!(next.attempts, 1);
    }

    #[test]
    fn cursor_roundtrip() {
        let id = JobId::new();
        let now = Utc::now();
        let cursor = encode_cursor(now, &id);
        let (millis, raw_id) = decode_cursor(&cursor).unwrap();
        assert_eq!(millis, now.timestamp_millis());
        assert_eq!(raw_id, id.to_string());
    }
}
