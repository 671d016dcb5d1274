//! Submission, reads, cancel and retry.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use vget_jobstore::{JobFilter, JobPage, JobStore, TransitionPatch};
use vget_models::{
    canonicalize_url, Job, JobId, JobOptions, JobStatus, ProgressEvent, Stage,
};
use vget_queue::{ProgressBus, Queue, QueueError};

use crate::config::AppConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

/// A submission request from the surrounding API layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequest {
    /// Source URL as the caller sent it
    pub source_url: String,
    /// Download options
    #[serde(default)]
    pub options: JobOptions,
}

/// A created job plus the informational completion estimate.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    pub estimated_duration: Duration,
}

/// Outcome of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The row is already terminal-cancelled
    Cancelled,
    /// The running worker will observe the flag at its next checkpoint
    Accepted,
}

/// Accepts requests, coordinates retry/cancel, exposes reads.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn Queue>,
    bus: Arc<ProgressBus>,
    config: AppConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn Queue>,
        bus: Arc<ProgressBus>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            queue,
            bus,
            config,
        }
    }

    /// Validate, create and enqueue a new job.
    ///
    /// Rejections happen before any row exists; a queue duplicate (e.g. a
    /// double-submitted retry) is treated as already enqueued.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        caller: &str,
    ) -> OrchestratorResult<Submission> {
        let url = canonicalize_url(&request.source_url, &self.config.allowed_hosts)?;

        let job = Job::new(url, request.options, caller)
            .with_max_attempts(self.config.max_attempts);
        let id = self.store.create(job.clone()).await?;

        self.enqueue_tolerating_duplicate(&id, 0).await?;

        info!(job_id = %id, caller = %caller, "job submitted");
        Ok(Submission {
            job,
            estimated_duration: self.config.estimated_duration,
        })
    }

    /// Load a job by id.
    pub async fn get(&self, id: &JobId) -> OrchestratorResult<Job> {
        Ok(self.store.load(id).await?)
    }

    /// List jobs, newest first.
    pub async fn list(
        &self,
        filter: JobFilter,
        page: JobPage,
    ) -> OrchestratorResult<(Vec<Job>, Option<String>)> {
        Ok(self.store.list(filter, page).await?)
    }

    /// Latest progress event for a job, if any has been published.
    pub fn progress_snapshot(&self, id: &JobId) -> Option<ProgressEvent> {
        self.bus.snapshot(id)
    }

    /// Cancel a job.
    ///
    /// Queued rows cancel immediately; running rows get the flag and the
    /// status change becomes observable at the worker's next checkpoint.
    pub async fn cancel(&self, id: &JobId) -> OrchestratorResult<CancelOutcome> {
        let job = self.store.load(id).await?;

        match job.status {
            JobStatus::Queued => {
                let cancelled = self
                    .store
                    .transition(
                        id,
                        &[JobStatus::Queued],
                        JobStatus::Cancelled,
                        TransitionPatch::default(),
                    )
                    .await?;
                self.bus.publish_terminal(
                    ProgressEvent::new(id.clone(), Stage::Finalizing, cancelled.progress)
                        .with_message(JobStatus::Cancelled.as_str()),
                );
                info!(job_id = %id, "cancelled while queued");
                Ok(CancelOutcome::Cancelled)
            }
            JobStatus::Running => {
                self.store.request_cancel(id).await?;
                info!(job_id = %id, "cancel requested for running job");
                Ok(CancelOutcome::Accepted)
            }
            JobStatus::Cancelled => Ok(CancelOutcome::Cancelled),
            status => Err(OrchestratorError::Conflict(format!(
                "job {} is {}, not cancellable",
                id, status
            ))),
        }
    }

    /// Re-queue a failed job without resetting its attempt count.
    pub async fn retry(&self, id: &JobId) -> OrchestratorResult<Job> {
        let job = self.store.load(id).await?;

        if job.status != JobStatus::Failed {
            return Err(OrchestratorError::Conflict(format!(
                "job {} is {}, only failed jobs can be retried",
                id, job.status
            )));
        }
        if job.attempts >= job.max_attempts {
            return Err(OrchestratorError::Conflict(format!(
                "job {} has exhausted its {} attempts",
                id, job.max_attempts
            )));
        }

        let requeued = self
            .store
            .transition(
                id,
                &[JobStatus::Failed],
                JobStatus::Queued,
                TransitionPatch::requeue(),
            )
            .await?;
        self.enqueue_tolerating_duplicate(id, requeued.attempts).await?;

        info!(job_id = %id, attempt = requeued.attempts, "job requeued by operator");
        Ok(requeued)
    }

    async fn enqueue_tolerating_duplicate(
        &self,
        id: &JobId,
        attempt: u32,
    ) -> OrchestratorResult<()> {
        match self.queue.enqueue(id, attempt, Duration::ZERO).await {
            Ok(()) => Ok(()),
            Err(QueueError::Duplicate(key)) => {
                debug!(job_id = %id, "payload already pending ({})", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
