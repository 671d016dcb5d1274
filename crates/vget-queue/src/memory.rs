//! In-memory queue for single-process deployments and tests.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use vget_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::payload::{JobPayload, Lease};
use crate::queue::Queue;

struct Waiting {
    payload: JobPayload,
    visible_at: Instant,
}

struct InFlight {
    payload: JobPayload,
    deadline: Instant,
}

#[derive(Default)]
struct Inner {
    waiting: Vec<Waiting>,
    inflight: HashMap<String, InFlight>,
    dlq: Vec<(JobPayload, String)>,
    /// Dedup keys of payloads live anywhere in the queue
    live: HashSet<String>,
}

/// Queue held entirely in process memory.
///
/// Visibility expiry is enforced lazily: expired reservations move back to
/// the waiting set whenever `reserve` runs.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn release_expired(inner: &mut Inner, now: Instant) {
        let expired: Vec<String> = inner
            .inflight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(flight) = inner.inflight.remove(&token) {
                debug!(
                    "visibility expired for {}, redelivering",
                    flight.payload.job_id
                );
                inner.waiting.push(Waiting {
                    payload: flight.payload,
                    visible_at: now,
                });
            }
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, job_id: &JobId, attempt: u32, delay: Duration) -> QueueResult<()> {
        let payload = JobPayload::new(job_id.clone(), attempt);
        let key = payload.dedup_key();

        let mut inner = self.inner.lock().await;
        if !inner.live.insert(key.clone()) {
            return Err(QueueError::duplicate(key));
        }
        inner.waiting.push(Waiting {
            payload,
            visible_at: Instant::now() + delay,
        });
        Ok(())
    }

    async fn reserve(&self, visibility: Duration) -> QueueResult<Option<Lease>> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::release_expired(&mut inner, now);

        // Oldest visible entry first.
        let idx = inner
            .waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| w.visible_at <= now)
            .min_by_key(|(_, w)| w.visible_at)
            .map(|(i, _)| i);

        let Some(idx) = idx else {
            return Ok(None);
        };

        let waiting = inner.waiting.swap_remove(idx);
        let token = Uuid::new_v4().to_string();
        inner.inflight.insert(
            token.clone(),
            InFlight {
                payload: waiting.payload.clone(),
                deadline: now + visibility,
            },
        );

        Ok(Some(Lease {
            payload: waiting.payload,
            token,
        }))
    }

    async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.inflight.remove(&lease.token) {
            Some(flight) => {
                let key = flight.payload.dedup_key();
                inner.live.remove(&key);
                Ok(())
            }
            // Expired and redelivered elsewhere; acking is now meaningless
            // but harmless, matching at-least-once semantics.
            None => Ok(()),
        }
    }

    async fn nack(&self, lease: &Lease, requeue_delay: Duration) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.inflight.remove(&lease.token) {
            Some(flight) => {
                inner.waiting.push(Waiting {
                    payload: flight.payload,
                    visible_at: Instant::now() + requeue_delay,
                });
                Ok(())
            }
            None => Err(QueueError::unknown_lease(lease.token.clone())),
        }
    }

    async fn dead_letter(&self, payload: &JobPayload, reason: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let key = payload.dedup_key();
        inner.live.remove(&key);
        inner.dlq.push((payload.clone(), reason.to_string()));
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.waiting.len() as u64)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.dlq.len() as u64)
    }

    async fn probe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIS: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn enqueue_reserve_ack() {
        let q = MemoryQueue::new();
        q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap();

        let lease = q.reserve(VIS).await.unwrap().expect("payload visible");
        assert_eq!(lease.payload.job_id, JobId::from("j1"));
        assert_eq!(lease.payload.attempt, 0);

        // Reserved payload is invisible.
        assert!(q.reserve(VIS).await.unwrap().is_none());

        q.ack(&lease).await.unwrap();
        assert_eq!(q.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let q = MemoryQueue::new();
        q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap();
        let err = q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap_err();
        assert!(err.is_duplicate());

        // A different attempt is a different payload.
        q.enqueue(&JobId::from("j1"), 1, Duration::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn ack_frees_the_dedup_key() {
        let q = MemoryQueue::new();
        q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap();
        let lease = q.reserve(VIS).await.unwrap().unwrap();
        q.ack(&lease).await.unwrap();

        q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_payload_becomes_visible_later() {
        let q = MemoryQueue::new();
        q.enqueue(&JobId::from("j1"), 0, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(q.reserve(VIS).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(q.reserve(VIS).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_expiry_redelivers() {
        let q = MemoryQueue::new();
        q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap();

        let first = q.reserve(Duration::from_secs(10)).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        let second = q.reserve(VIS).await.unwrap().expect("redelivered");
        assert_eq!(second.payload, first.payload);
        assert_ne!(second.token, first.token);

        // The stale lease acks harmlessly.
        q.ack(&first).await.unwrap();
        q.ack(&second).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn nack_delays_redelivery() {
        let q = MemoryQueue::new();
        q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap();

        let lease = q.reserve(VIS).await.unwrap().unwrap();
        q.nack(&lease, Duration::from_secs(30)).await.unwrap();

        assert!(q.reserve(VIS).await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(q.reserve(VIS).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dead_letter_records_reason_and_frees_key() {
        let q = MemoryQueue::new();
        q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap();
        let lease = q.reserve(VIS).await.unwrap().unwrap();

        q.dead_letter(&lease.payload, "exhausted retries").await.unwrap();
        q.ack(&lease).await.unwrap();

        assert_eq!(q.dlq_len().await.unwrap(), 1);
        // The payload may be re-enqueued manually after inspection.
        q.enqueue(&JobId::from("j1"), 0, Duration::ZERO).await.unwrap();
    }
}
