//! Shared clients a worker needs to execute jobs.

use std::sync::Arc;

use vget_cookies::CookieStore;
use vget_extractor::Extract;
use vget_jobstore::JobStore;
use vget_queue::{ProgressBus, Queue};
use vget_storage::Storage;

use crate::config::WorkerConfig;

/// Everything the job runner touches, shared across the pool.
pub struct WorkerContext {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn Queue>,
    pub storage: Arc<dyn Storage>,
    /// Absent when the deployment serves no gated content
    pub cookies: Option<Arc<CookieStore>>,
    pub bus: Arc<ProgressBus>,
    pub extractor: Arc<dyn Extract>,
    pub config: WorkerConfig,
}

impl WorkerContext {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn Queue>,
        storage: Arc<dyn Storage>,
        cookies: Option<Arc<CookieStore>>,
        bus: Arc<ProgressBus>,
        extractor: Arc<dyn Extract>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            storage,
            cookies,
            bus,
            extractor,
            config,
        }
    }
}
