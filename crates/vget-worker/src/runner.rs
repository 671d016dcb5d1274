//! Execution of one queue reservation end to end.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use vget_cookies::CookieHandle;
use vget_extractor::{ExtractRequest, Extraction, ExtractorError, RawProgress};
use vget_jobstore::TransitionPatch;
use vget_models::{
    subtitle_key, thumbnail_key, video_key, Artifact, ErrorKind, Job, JobArtifacts, JobId,
    JobStatus, ProgressEvent,
};
use vget_queue::{retry_backoff, Lease};

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::{with_retries, RetryPolicy};
use crate::stages;

/// What the executor should do with the queue payload afterwards.
#[derive(Debug)]
pub enum RunOutcome {
    /// Remove the payload; the job reached a conclusion (or was a
    /// duplicate delivery).
    Ack,
    /// Redeliver after the given backoff.
    Retry(std::time::Duration),
    /// Exhausted; park the payload for inspection and remove it.
    DeadLetter(String),
}

/// Runs single reservations against the shared context.
pub struct JobRunner {
    ctx: Arc<WorkerContext>,
}

impl JobRunner {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    /// Execute one reservation to a terminal decision.
    pub async fn execute(&self, lease: &Lease) -> RunOutcome {
        let job_id = &lease.payload.job_id;

        let job = match self.ctx.store.load(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                warn!(job_id = %job_id, "payload references unknown job, dropping");
                return RunOutcome::Ack;
            }
            Err(e) => {
                error!(job_id = %job_id, "job store unavailable: {}", e);
                return RunOutcome::Retry(retry_backoff(lease.payload.attempt + 1));
            }
        };

        let claimed = match self.claim(job).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id = %job_id, "reservation not claimable, dropping");
                return RunOutcome::Ack;
            }
            Err(e) => {
                error!(job_id = %job_id, "claim failed: {}", e);
                return RunOutcome::Retry(retry_backoff(lease.payload.attempt + 1));
            }
        };

        info!(
            job_id = %job_id,
            attempt = claimed.attempts,
            "starting attempt"
        );

        match self.run_attempt(&claimed).await {
            Ok(final_job) => {
                info!(job_id = %job_id, "job succeeded");
                self.publish_terminal(&final_job);
                let _ = self.ctx.store.clear_cancel(job_id).await;
                RunOutcome::Ack
            }
            Err(err) => self.conclude_failure(&claimed, err).await,
        }
    }

    /// Take ownership of the row for this reservation.
    ///
    /// A queued row begins a fresh attempt. A running row is resumed only
    /// when its `started_at` predates the visibility window, meaning the
    /// previous owner died; a younger row still has a live owner and the
    /// duplicate delivery is dropped.
    async fn claim(&self, job: Job) -> WorkerResult<Option<Job>> {
        match job.status {
            JobStatus::Queued => {
                match self
                    .ctx
                    .store
                    .transition(
                        &job.id,
                        &[JobStatus::Queued],
                        JobStatus::Running,
                        TransitionPatch::begin_attempt(),
                    )
                    .await
                {
                    Ok(job) => Ok(Some(job)),
                    Err(e) if e.is_conflict() => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            JobStatus::Running => {
                let visibility = chrono::Duration::from_std(self.ctx.config.visibility())
                    .unwrap_or_else(|_| chrono::Duration::seconds(600));
                let stale = job
                    .started_at
                    .map_or(true, |started| Utc::now() - started > visibility);
                if !stale {
                    return Ok(None);
                }

                warn!(job_id = %job.id, "resuming job from a dead worker");
                match self
                    .ctx
                    .store
                    .transition(
                        &job.id,
                        &[JobStatus::Running],
                        JobStatus::Running,
                        TransitionPatch::resume_attempt(),
                    )
                    .await
                {
                    Ok(job) => Ok(Some(job)),
                    Err(e) if e.is_conflict() => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            _ => Ok(None),
        }
    }

    /// One full attempt: credentials, extraction, uploads, success
    /// transition. Any error here goes through the failure classifier.
    async fn run_attempt(&self, job: &Job) -> WorkerResult<Job> {
        let job_id = job.id.clone();

        tokio::fs::create_dir_all(&self.ctx.config.scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("vget-job-")
            .tempdir_in(&self.ctx.config.scratch_root)?;

        // Cancel plumbing: a poll task flips the watch flag once the store
        // reports a cancel request, bounded by the heartbeat cadence.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let poll_task = {
            let store = self.ctx.store.clone();
            let id = job_id.clone();
            let period = self.ctx.config.progress_heartbeat;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    if let Ok(true) = store.cancel_requested(&id).await {
                        let _ = cancel_tx.send(true);
                        break;
                    }
                }
            })
        };

        // Progress forwarder: the extractor callback is synchronous, so
        // store writes go through a channel that coalesces under load.
        let (progress_tx, mut progress_rx) = mpsc::channel::<f64>(16);
        let forwarder = {
            let store = self.ctx.store.clone();
            let id = job_id.clone();
            tokio::spawn(async move {
                while let Some(percent) = progress_rx.recv().await {
                    if let Err(e) = store.touch_progress(&id, percent).await {
                        debug!(job_id = %id, "progress write dropped: {}", e);
                    }
                }
            })
        };

        let result = self
            .attempt_inner(job, scratch.path(), cancel_rx, progress_tx)
            .await;

        poll_task.abort();
        forwarder.abort();
        // Scratch directory is removed when `scratch` drops, success or not.

        result
    }

    async fn attempt_inner(
        &self,
        job: &Job,
        scratch: &Path,
        cancel_rx: watch::Receiver<bool>,
        progress_tx: mpsc::Sender<f64>,
    ) -> WorkerResult<Job> {
        let job_id = job.id.clone();

        self.report(&job_id, &progress_tx, 1.0, None);

        let mut cookie_handle: Option<CookieHandle> = None;
        if job.options.use_credentials {
            let cookies = self
                .ctx
                .cookies
                .as_ref()
                .ok_or(WorkerError::CredentialsUnavailable)?;
            cookie_handle = Some(cookies.get_active().await?);
        }

        self.report(&job_id, &progress_tx, stages::PREPARING_END + 2.0, None);

        let extraction = self
            .extract_with_rotation(job, &mut cookie_handle, scratch, cancel_rx.clone(), &progress_tx)
            .await?;

        if *cancel_rx.borrow() {
            return Err(WorkerError::Cancelled);
        }

        let artifacts = self
            .upload_artifacts(job, &extraction, &cancel_rx, &progress_tx)
            .await?;

        self.report(&job_id, &progress_tx, stages::UPLOADING_END + 0.5, None);

        let final_job = self
            .ctx
            .store
            .transition(
                &job_id,
                &[JobStatus::Running],
                JobStatus::Succeeded,
                TransitionPatch::succeed(extraction.metadata.clone(), artifacts),
            )
            .await?;

        // The handle (and with it the materialized cookie file) lives until
        // here, covering every extractor invocation of the attempt.
        drop(cookie_handle);

        Ok(final_job)
    }

    /// Run the extractor; on an auth failure that tips the rotation
    /// threshold, retry once within the same attempt using the promoted jar.
    async fn extract_with_rotation(
        &self,
        job: &Job,
        cookie_handle: &mut Option<CookieHandle>,
        scratch: &Path,
        cancel_rx: watch::Receiver<bool>,
        progress_tx: &mpsc::Sender<f64>,
    ) -> WorkerResult<Extraction> {
        let first = self
            .extract(job, cookie_handle.as_ref(), scratch, cancel_rx.clone(), progress_tx)
            .await;

        let auth_message = match first {
            Err(WorkerError::Extractor(ExtractorError::AuthRequired(msg)))
                if cookie_handle.is_some() =>
            {
                msg
            }
            other => return other,
        };

        let cookies = self
            .ctx
            .cookies
            .as_ref()
            .ok_or(WorkerError::CredentialsUnavailable)?;
        let Some(handle) = cookie_handle.as_ref() else {
            return Err(ExtractorError::AuthRequired(auth_message).into());
        };
        let promoted = cookies.mark_bad(handle.fingerprint(), &auth_message).await?;

        if !promoted {
            return Err(ExtractorError::AuthRequired(auth_message).into());
        }

        info!(job_id = %job.id, "retrying extraction with promoted cookie jar");
        *cookie_handle = Some(cookies.get_active().await?);
        self.extract(job, cookie_handle.as_ref(), scratch, cancel_rx, progress_tx)
            .await
    }

    async fn extract(
        &self,
        job: &Job,
        cookie_handle: Option<&CookieHandle>,
        scratch: &Path,
        cancel_rx: watch::Receiver<bool>,
        progress_tx: &mpsc::Sender<f64>,
    ) -> WorkerResult<Extraction> {
        let bus = self.ctx.bus.clone();
        let tx = progress_tx.clone();
        let job_id = job.id.clone();

        let on_progress = move |raw: RawProgress| {
            let overall = stages::download_progress(raw.percent);
            let mut event =
                ProgressEvent::new(job_id.clone(), stages::stage_for(overall), overall);
            if let Some(message) = raw.message {
                event = event.with_message(message);
            }
            bus.publish(event);
            let _ = tx.try_send(overall);
        };

        let request = ExtractRequest {
            url: job.source_url.clone(),
            options: job.options.clone(),
            cookie_file: cookie_handle.map(|h| h.path().to_path_buf()),
            dest_dir: scratch.join("out"),
            cancel: Some(cancel_rx),
        };

        Ok(self.ctx.extractor.run(request, &on_progress).await?)
    }

    /// Stream artifacts into storage: video first, then subtitles, then
    /// thumbnail. Each upload retries inside the attempt before escalating.
    async fn upload_artifacts(
        &self,
        job: &Job,
        extraction: &Extraction,
        cancel_rx: &watch::Receiver<bool>,
        progress_tx: &mpsc::Sender<f64>,
    ) -> WorkerResult<JobArtifacts> {
        let title = extraction
            .metadata
            .title
            .clone()
            .unwrap_or_else(|| "video".to_string());

        let mut artifacts = JobArtifacts::default();
        let total = 1 + extraction.subtitles.len() + usize::from(extraction.thumbnail.is_some());
        let mut uploaded = 0usize;

        let key = video_key(&job.id, &title, job.options.output_ext());
        let put = self
            .upload_one(&key, &extraction.media_file, job.options.output_content_type())
            .await?;
        artifacts.video = Some(Artifact {
            storage_key: key,
            size_bytes: put.size_bytes,
            content_type: job.options.output_content_type().to_string(),
        });
        uploaded += 1;
        self.report(
            &job.id,
            progress_tx,
            stages::upload_progress(uploaded, total),
            Some(&title),
        );

        for (lang, path) in &extraction.subtitles {
            if *cancel_rx.borrow() {
                return Err(WorkerError::Cancelled);
            }
            let key = subtitle_key(&job.id, &title, lang);
            let put = self.upload_one(&key, path, "application/x-subrip").await?;
            artifacts.subtitles.insert(
                lang.clone(),
                Artifact {
                    storage_key: key,
                    size_bytes: put.size_bytes,
                    content_type: "application/x-subrip".to_string(),
                },
            );
            uploaded += 1;
            self.report(
                &job.id,
                progress_tx,
                stages::upload_progress(uploaded, total),
                Some(lang),
            );
        }

        if let Some(path) = &extraction.thumbnail {
            if *cancel_rx.borrow() {
                return Err(WorkerError::Cancelled);
            }
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("jpg")
                .to_ascii_lowercase();
            let content_type = match ext.as_str() {
                "png" => "image/png",
                "webp" => "image/webp",
                _ => "image/jpeg",
            };
            let key = thumbnail_key(&job.id, &ext);
            let put = self.upload_one(&key, path, content_type).await?;
            artifacts.thumbnail = Some(Artifact {
                storage_key: key,
                size_bytes: put.size_bytes,
                content_type: content_type.to_string(),
            });
        }

        Ok(artifacts)
    }

    async fn upload_one(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> WorkerResult<vget_storage::PutResult> {
        let policy = RetryPolicy::new("artifact upload", self.ctx.config.upload_retries);
        let timeout = self.ctx.config.upload_timeout;

        with_retries(
            &policy,
            |e: &WorkerError| {
                matches!(
                    e.classify(),
                    ErrorKind::StorageUnavailable | ErrorKind::Timeout
                )
            },
            || async {
                tokio::time::timeout(timeout, self.ctx.storage.put_file(key, path, content_type))
                    .await
                    .map_err(|_| WorkerError::UploadTimeout(timeout.as_secs()))?
                    .map_err(WorkerError::from)
            },
        )
        .await
    }

    /// Decide what a failed attempt means for the row and the payload.
    async fn conclude_failure(&self, job: &Job, err: WorkerError) -> RunOutcome {
        let kind = err.classify();
        let failure = err.to_failure();
        let job_id = &job.id;

        warn!(job_id = %job_id, kind = %kind, "attempt failed: {}", err);

        if kind == ErrorKind::Cancelled {
            match self
                .ctx
                .store
                .transition(
                    job_id,
                    &[JobStatus::Running],
                    JobStatus::Cancelled,
                    TransitionPatch::default(),
                )
                .await
            {
                Ok(final_job) => {
                    self.publish_terminal(&final_job);
                    let _ = self.ctx.store.clear_cancel(job_id).await;
                }
                Err(e) => error!(job_id = %job_id, "cancel transition failed: {}", e),
            }
            return RunOutcome::Ack;
        }

        // Retryable kinds use the full attempt budget; unclassified
        // failures get exactly one more try before going terminal.
        let budget_left = job.attempts < job.max_attempts;
        let one_more_for_internal = kind == ErrorKind::Internal && job.attempts < 2;

        if budget_left && (kind.is_retryable() || one_more_for_internal) {
            match self
                .ctx
                .store
                .transition(
                    job_id,
                    &[JobStatus::Running],
                    JobStatus::Queued,
                    TransitionPatch {
                        progress: Some(0.0),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(_) => {
                    let delay = retry_backoff(job.attempts);
                    info!(
                        job_id = %job_id,
                        attempt = job.attempts,
                        "requeueing with {:?} backoff",
                        delay
                    );
                    return RunOutcome::Retry(delay);
                }
                Err(e) => {
                    error!(job_id = %job_id, "requeue transition failed: {}", e);
                    // Fall through to the terminal path.
                }
            }
        }

        match self
            .ctx
            .store
            .transition(
                job_id,
                &[JobStatus::Running],
                JobStatus::Failed,
                TransitionPatch::fail(failure.clone()),
            )
            .await
        {
            Ok(final_job) => {
                self.publish_terminal(&final_job);
                let _ = self.ctx.store.clear_cancel(job_id).await;
            }
            Err(e) => error!(job_id = %job_id, "failure transition failed: {}", e),
        }

        if kind.is_retryable() {
            // Retry budget exhausted: park for inspection.
            RunOutcome::DeadLetter(failure.to_string())
        } else {
            RunOutcome::Ack
        }
    }

    /// Final event for a terminal row; closes the job's topic.
    fn publish_terminal(&self, job: &Job) {
        let percent = job.progress;
        let event = ProgressEvent::new(job.id.clone(), stages::stage_for(percent), percent)
            .with_message(job.status.as_str());
        self.ctx.bus.publish_terminal(event);
    }

    /// Publish a stage update and forward it to the store.
    fn report(
        &self,
        job_id: &JobId,
        progress_tx: &mpsc::Sender<f64>,
        percent: f64,
        message: Option<&str>,
    ) {
        let mut event =
            ProgressEvent::new(job_id.clone(), stages::stage_for(percent), percent);
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.ctx.bus.publish(event);
        let _ = progress_tx.try_send(percent);
    }
}
