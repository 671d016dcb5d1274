//! The worker pool: queue consumption with bounded concurrency.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, Instrument};

use vget_queue::Lease;

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::runner::{JobRunner, RunOutcome};

/// Pause between empty reserves so an idle pool does not spin.
const IDLE_PAUSE: Duration = Duration::from_millis(250);

/// Consumes reservations and runs them on a bounded pool.
pub struct JobExecutor {
    ctx: Arc<WorkerContext>,
    runner: Arc<JobRunner>,
    permits: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        let permits = Arc::new(Semaphore::new(ctx.config.concurrency));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            runner: Arc::new(JobRunner::new(Arc::clone(&ctx))),
            ctx,
            permits,
            shutdown,
        }
    }

    /// Run until shutdown, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            concurrency = self.ctx.config.concurrency,
            "starting job executor"
        );
        tokio::fs::create_dir_all(&self.ctx.config.scratch_root).await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown signal received, stopping consumption");
                        break;
                    }
                }
                result = self.consume_one() => {
                    if let Err(e) = result {
                        error!("queue consumption error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        info!("waiting for in-flight jobs to drain");
        let _ = tokio::time::timeout(self.ctx.config.drain_timeout, self.drain()).await;
        info!("job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_one(&self) -> WorkerResult<()> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| {
                vget_queue::QueueError::backend("executor semaphore closed")
            })?;

        let lease = match self.ctx.queue.reserve(self.ctx.config.visibility()).await? {
            Some(lease) => lease,
            None => {
                drop(permit);
                tokio::time::sleep(IDLE_PAUSE).await;
                return Ok(());
            }
        };

        let ctx = Arc::clone(&self.ctx);
        let runner = Arc::clone(&self.runner);
        let span = tracing::info_span!(
            "job",
            job_id = %lease.payload.job_id,
            attempt = lease.payload.attempt
        );

        tokio::spawn(
            async move {
                let _permit = permit;
                Self::settle(&ctx, &runner, lease).await;
            }
            .instrument(span),
        );

        Ok(())
    }

    /// Run one lease and apply its outcome to the queue.
    async fn settle(ctx: &WorkerContext, runner: &JobRunner, lease: Lease) {
        let outcome = runner.execute(&lease).await;
        debug!(job_id = %lease.payload.job_id, "outcome: {:?}", outcome);

        match outcome {
            RunOutcome::Ack => {
                metrics::counter!("vget_jobs_settled_total", "outcome" => "ack").increment(1);
                if let Err(e) = ctx.queue.ack(&lease).await {
                    error!("ack failed: {}", e);
                }
            }
            RunOutcome::Retry(delay) => {
                metrics::counter!("vget_jobs_settled_total", "outcome" => "retry").increment(1);
                if let Err(e) = ctx.queue.nack(&lease, delay).await {
                    error!("nack failed: {}", e);
                }
            }
            RunOutcome::DeadLetter(reason) => {
                metrics::counter!("vget_jobs_settled_total", "outcome" => "dead_letter")
                    .increment(1);
                if let Err(e) = ctx.queue.dead_letter(&lease.payload, &reason).await {
                    error!("dead-letter failed: {}", e);
                }
                if let Err(e) = ctx.queue.ack(&lease).await {
                    error!("ack after dead-letter failed: {}", e);
                }
            }
        }
    }

    async fn drain(&self) {
        loop {
            if self.permits.available_permits() == self.ctx.config.concurrency {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
