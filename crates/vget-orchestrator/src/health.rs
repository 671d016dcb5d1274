//! Aggregated health over every backend the core touches.

use std::sync::Arc;

use serde::Serialize;

use vget_cookies::CookieStore;
use vget_jobstore::JobStore;
use vget_queue::Queue;
use vget_storage::Storage;

/// Result of probing every backend.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub job_store: bool,
    pub storage: bool,
    pub queue: bool,
    /// Absent when no credential store is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<bool>,
}

impl HealthReport {
    /// Probe everything. Storage gets a real put-get-delete round trip.
    pub async fn collect(
        store: &Arc<dyn JobStore>,
        storage: &Arc<dyn Storage>,
        queue: &Arc<dyn Queue>,
        cookies: Option<&Arc<CookieStore>>,
    ) -> Self {
        let (job_store, storage_health, queue_health) = tokio::join!(
            store.probe(),
            storage.probe(),
            queue.probe(),
        );

        let credentials = match cookies {
            Some(cookies) => Some(cookies.probe().await),
            None => None,
        };

        Self {
            job_store,
            storage: storage_health.is_healthy(),
            queue: queue_health,
            credentials,
        }
    }

    /// True when every configured backend probed healthy.
    pub fn healthy(&self) -> bool {
        self.job_store && self.storage && self.queue && self.credentials.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vget_jobstore::MemoryJobStore;
    use vget_queue::MemoryQueue;
    use vget_storage::LocalStorage;

    #[tokio::test]
    async fn healthy_with_memory_backends() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::new(dir.path(), None).await.unwrap());
        let queue: Arc<dyn Queue> = Arc::new(MemoryQueue::new());

        let report = HealthReport::collect(&store, &storage, &queue, None).await;
        assert!(report.healthy());
        assert!(report.credentials.is_none());
    }
}
