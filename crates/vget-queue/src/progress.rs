//! In-process progress fan-out.
//!
//! Publish/subscribe keyed by job id. Each subscriber gets a bounded
//! buffer; slow consumers lose oldest events rather than blocking the
//! publisher. The last event per topic is retained so late subscribers
//! can prime themselves, including after the topic closes on a terminal
//! transition.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use vget_models::{JobId, ProgressEvent, Stage};

/// Per-subscriber buffer capacity.
const SUBSCRIBER_CAPACITY: usize = 64;

struct Topic {
    /// Present while the topic is open; dropped on close so subscriber
    /// streams terminate.
    sender: Option<broadcast::Sender<ProgressEvent>>,
    last: Option<ProgressEvent>,
}

impl Topic {
    fn open() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            sender: Some(sender),
            last: None,
        }
    }
}

/// A bounded subscription to one job's progress events.
pub struct Subscription {
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
}

impl Subscription {
    /// Next event in publish order.
    ///
    /// Returns `None` once the topic closes and the buffer drains. A slow
    /// consumer silently skips the events that fell off its buffer.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("subscriber lagged, skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }
}

/// In-process publish/subscribe for job progress.
pub struct ProgressBus {
    topics: Mutex<HashMap<JobId, Topic>>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an event. Never blocks; events for a closed topic only
    /// refresh the retained snapshot.
    pub fn publish(&self, event: ProgressEvent) {
        let mut topics = self.topics.lock().expect("progress bus lock");
        let topic = topics
            .entry(event.job_id.clone())
            .or_insert_with(Topic::open);

        topic.last = Some(event.clone());
        if let Some(sender) = &topic.sender {
            // Send only fails with zero receivers, which is fine.
            let _ = sender.send(event);
        }
    }

    /// Publish the final event for a job and close its topic. Subscriber
    /// streams end once they drain their buffers.
    pub fn publish_terminal(&self, event: ProgressEvent) {
        let mut topics = self.topics.lock().expect("progress bus lock");
        let topic = topics
            .entry(event.job_id.clone())
            .or_insert_with(Topic::open);

        topic.last = Some(event.clone());
        if let Some(sender) = topic.sender.take() {
            let _ = sender.send(event);
        }
    }

    /// Convenience publisher for a stage update.
    pub fn stage(&self, job_id: &JobId, stage: Stage, percent: f64) {
        self.publish(ProgressEvent::new(job_id.clone(), stage, percent));
    }

    /// Subscribe to a job's events.
    ///
    /// Subscribing to a closed or unknown topic yields an already-ended
    /// subscription; use [`ProgressBus::snapshot`] to read the final state.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        let mut topics = self.topics.lock().expect("progress bus lock");
        let receiver = topics
            .entry(job_id.clone())
            .or_insert_with(Topic::open)
            .sender
            .as_ref()
            .map(|s| s.subscribe());
        Subscription { receiver }
    }

    /// Drop a subscription.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Last published event for a job, if any.
    pub fn snapshot(&self, job_id: &JobId) -> Option<ProgressEvent> {
        let topics = self.topics.lock().expect("progress bus lock");
        topics.get(job_id).and_then(|t| t.last.clone())
    }

    /// Forget a topic entirely (external deletion of the job).
    pub fn forget(&self, job_id: &JobId) {
        let mut topics = self.topics.lock().expect("progress bus lock");
        topics.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(job_id: &JobId, percent: f64) -> ProgressEvent {
        ProgressEvent::new(job_id.clone(), Stage::Downloading, percent)
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = ProgressBus::new();
        let id = JobId::new();
        let mut sub = bus.subscribe(&id);

        for p in [10.0, 20.0, 30.0] {
            bus.publish(event(&id, p));
        }

        assert_eq!(sub.recv().await.unwrap().percent, 10.0);
        assert_eq!(sub.recv().await.unwrap().percent, 20.0);
        assert_eq!(sub.recv().await.unwrap().percent, 30.0);
    }

    #[tokio::test]
    async fn terminal_event_ends_the_stream() {
        let bus = ProgressBus::new();
        let id = JobId::new();
        let mut sub = bus.subscribe(&id);

        bus.publish(event(&id, 50.0));
        bus.publish_terminal(
            ProgressEvent::new(id.clone(), Stage::Finalizing, 100.0),
        );

        assert_eq!(sub.recv().await.unwrap().percent, 50.0);
        assert_eq!(sub.recv().await.unwrap().percent, 100.0);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn snapshot_survives_topic_close() {
        let bus = ProgressBus::new();
        let id = JobId::new();

        bus.publish_terminal(
            ProgressEvent::new(id.clone(), Stage::Finalizing, 100.0),
        );

        // Late subscriber: stream already over, snapshot primes it.
        let mut sub = bus.subscribe(&id);
        assert!(sub.recv().await.is_none());
        let last = bus.snapshot(&id).unwrap();
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.stage, Stage::Finalizing);
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_only() {
        let bus = ProgressBus::new();
        let id = JobId::new();
        let mut sub = bus.subscribe(&id);

        // Overflow the 64-slot buffer.
        for p in 0..100 {
            bus.publish(event(&id, p as f64));
        }

        let first = sub.recv().await.unwrap();
        assert!(first.percent >= 36.0, "oldest events should be dropped");

        let mut last = first.percent;
        while let Ok(Some(ev)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await
        {
            assert!(ev.percent >= last);
            last = ev.percent;
        }
        assert_eq!(last, 99.0);
    }

    #[tokio::test]
    async fn no_cross_job_delivery() {
        let bus = ProgressBus::new();
        let a = JobId::new();
        let b = JobId::new();
        let mut sub_a = bus.subscribe(&a);

        bus.publish(event(&b, 10.0));
        bus.publish(event(&a, 42.0));

        assert_eq!(sub_a.recv().await.unwrap().percent, 42.0);
    }

    #[tokio::test]
    async fn snapshot_of_unknown_job_is_none() {
        let bus = ProgressBus::new();
        assert!(bus.snapshot(&JobId::new()).is_none());
    }
}
