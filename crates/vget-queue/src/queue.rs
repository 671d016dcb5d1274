//! The queue contract and retry policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use vget_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::memory::MemoryQueue;
use crate::payload::{JobPayload, Lease};
use crate::redis_queue::{RedisQueue, RedisQueueConfig};

/// Base delay for job-level retry backoff.
const BACKOFF_BASE: Duration = Duration::from_secs(30);
/// Ceiling for job-level retry backoff.
const BACKOFF_CAP: Duration = Duration::from_secs(600);

/// Backoff before redelivering attempt `attempt` (1-based): exponential,
/// base 30s, factor 2, capped at 10 minutes, with full jitter over the
/// upper half so synchronized failures spread out.
pub fn retry_backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let full = BACKOFF_BASE.saturating_mul(2u32.pow(exp)).min(BACKOFF_CAP);
    let half = full / 2;
    let jitter = rand::rng().random_range(0..=half.as_millis() as u64);
    half + Duration::from_millis(jitter)
}

/// At-least-once delivery of job payloads.
///
/// Payloads reserved but not acked before the visibility deadline become
/// visible again. Exactly-once completion is the job store's concern, not
/// the queue's.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue a payload, optionally delayed. Rejects a payload whose
    /// `{job_id, attempt}` is already live with [`QueueError::Duplicate`].
    async fn enqueue(&self, job_id: &JobId, attempt: u32, delay: Duration) -> QueueResult<()>;

    /// Reserve the next visible payload, holding it invisible for
    /// `visibility`. Returns `None` when nothing is due.
    async fn reserve(&self, visibility: Duration) -> QueueResult<Option<Lease>>;

    /// Complete a reservation, removing the payload permanently.
    async fn ack(&self, lease: &Lease) -> QueueResult<()>;

    /// Return a reservation to the queue after `requeue_delay`.
    async fn nack(&self, lease: &Lease, requeue_delay: Duration) -> QueueResult<()>;

    /// Move a payload to the dead-letter queue for out-of-band inspection.
    async fn dead_letter(&self, payload: &JobPayload, reason: &str) -> QueueResult<()>;

    /// Payloads currently queued or scheduled.
    async fn len(&self) -> QueueResult<u64>;

    /// Payloads in the dead-letter queue.
    async fn dlq_len(&self) -> QueueResult<u64>;

    /// Whether the backend is reachable.
    async fn probe(&self) -> bool;
}

/// Which queue backend to construct.
#[derive(Debug, Clone)]
pub enum QueueBackendConfig {
    Memory,
    Broker(RedisQueueConfig),
}

impl QueueBackendConfig {
    /// Read the backend selection from `QUEUE_BACKEND`.
    pub fn from_env() -> QueueResult<Self> {
        let backend = std::env::var("QUEUE_BACKEND").unwrap_or_else(|_| "memory".to_string());
        match backend.as_str() {
            "memory" => Ok(Self::Memory),
            "broker" => Ok(Self::Broker(RedisQueueConfig::from_env())),
            other => Err(QueueError::backend(format!(
                "QUEUE_BACKEND must be 'memory' or 'broker', got '{}'",
                other
            ))),
        }
    }

    /// Construct the configured backend, creating the broker's consumer
    /// group when needed.
    pub async fn connect(self) -> QueueResult<Arc<dyn Queue>> {
        match self {
            QueueBackendConfig::Memory => Ok(Arc::new(MemoryQueue::new())),
            QueueBackendConfig::Broker(config) => {
                let queue = RedisQueue::new(config)?;
                queue.init().await?;
                Ok(Arc::new(queue))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        for _ in 0..20 {
            let first = retry_backoff(1);
            assert!(first >= Duration::from_secs(15) && first <= Duration::from_secs(30));

            let second = retry_backoff(2);
            assert!(second >= Duration::from_secs(30) && second <= Duration::from_secs(60));

            let huge = retry_backoff(30);
            assert!(huge <= BACKOFF_CAP);
            assert!(huge >= BACKOFF_CAP / 2);
        }
    }
}
