//! In-memory job store for single-process deployments and tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use vget_models::{Job, JobId, JobStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    apply_transition, decode_cursor, encode_cursor, JobFilter, JobPage, JobStore,
    TransitionPatch,
};

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    cancels: HashSet<JobId>,
}

/// Job store held entirely in process memory.
///
/// One mutex serializes every mutation, which is the store-layer
/// serialization the transition contract requires.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> StoreResult<JobId> {
        let mut inner = self.inner.lock().await;
        let id = job.id.clone();
        inner.jobs.insert(id.clone(), job);
        Ok(id)
    }

    async fn load(&self, id: &JobId) -> StoreResult<Job> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id.to_string()))
    }

    async fn list(
        &self,
        filter: JobFilter,
        page: JobPage,
    ) -> StoreResult<(Vec<Job>, Option<String>)> {
        let inner = self.inner.lock().await;

        let mut jobs: Vec<&Job> = inner
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        if let Some(cursor) = &page.cursor {
            let (millis, raw_id) = decode_cursor(cursor)?;
            jobs.retain(|j| {
                let jm = j.created_at.timestamp_millis();
                jm < millis || (jm == millis && j.id.as_str() < raw_id.as_str())
            });
        }

        let out: Vec<Job> = jobs.iter().take(page.limit).map(|j| (*j).clone()).collect();
        let next_cursor = if jobs.len() > page.limit {
            out.last().map(|j| encode_cursor(j.created_at, &j.id))
        } else {
            None
        };

        Ok((out, next_cursor))
    }

    async fn transition(
        &self,
        id: &JobId,
        from_states: &[JobStatus],
        to_state: JobStatus,
        patch: TransitionPatch,
    ) -> StoreResult<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get(id)
            .ok_or_else(|| StoreError::not_found(id.to_string()))?;

        match apply_transition(job, from_states, to_state, &patch)? {
            Some(next) => {
                inner.jobs.insert(id.clone(), next.clone());
                Ok(next)
            }
            None => Ok(job.clone()),
        }
    }

    async fn touch_progress(&self, id: &JobId, percent: f64) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.to_string()))?;

        if job.status == JobStatus::Running {
            let bounded = percent.clamp(0.0, 99.0);
            if bounded > job.progress {
                job.progress = bounded;
            }
        }
        Ok(())
    }

    async fn request_cancel(&self, id: &JobId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.jobs.contains_key(id) {
            return Err(StoreError::not_found(id.to_string()));
        }
        inner.cancels.insert(id.clone());
        Ok(())
    }

    async fn cancel_requested(&self, id: &JobId) -> StoreResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.cancels.contains(id))
    }

    async fn clear_cancel(&self, id: &JobId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.cancels.remove(id);
        Ok(())
    }

    async fn probe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vget_models::JobOptions;

    fn job(created_offset_secs: i64) -> Job {
        let mut j = Job::new("https://host.example/v", JobOptions::default(), "svc");
        j.created_at = Utc::now() - Duration::seconds(created_offset_secs);
        j
    }

    #[tokio::test]
    async fn create_and_load() {
        let store = MemoryJobStore::new();
        let j = job(0);
        let id = store.create(j.clone()).await.unwrap();
        let loaded = store.load(&id).await.unwrap();
        assert_eq!(loaded.source_url, j.source_url);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = MemoryJobStore::new();
        assert!(store.load(&JobId::new()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_is_newest_first_with_cursor() {
        let store = MemoryJobStore::new();
        for i in 0..5 {
            store.create(job(i * 10)).await.unwrap();
        }

        let (first, cursor) = store
            .list(JobFilter::default(), JobPage { limit: 2, cursor: None })
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].created_at >= first[1].created_at);
        let cursor = cursor.expect("more pages");

        let (second, _) = store
            .list(
                JobFilter::default(),
                JobPage {
                    limit: 2,
                    cursor: Some(cursor),
                },
            )
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
        assert!(second[0].created_at <= first[1].created_at);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = MemoryJobStore::new();
        let id = store.create(job(0)).await.unwrap();
        store.create(job(1)).await.unwrap();
        store
            .transition(
                &id,
                &[JobStatus::Queued],
                JobStatus::Running,
                TransitionPatch::begin_attempt(),
            )
            .await
            .unwrap();

        let (running, _) = store
            .list(
                JobFilter {
                    status: Some(JobStatus::Running),
                },
                JobPage::default(),
            )
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, id);
    }

    #[tokio::test]
    async fn touch_progress_is_monotone_and_running_only() {
        let store = MemoryJobStore::new();
        let id = store.create(job(0)).await.unwrap();

        // Ignored while queued
        store.touch_progress(&id, 50.0).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().progress, 0.0);

        store
            .transition(
                &id,
                &[JobStatus::Queued],
                JobStatus::Running,
                TransitionPatch::begin_attempt(),
            )
            .await
            .unwrap();

        store.touch_progress(&id, 40.0).await.unwrap();
        store.touch_progress(&id, 30.0).await.unwrap(); // regression dropped
        assert_eq!(store.load(&id).await.unwrap().progress, 40.0);

        store.touch_progress(&id, 100.0).await.unwrap(); // capped below 100
        assert_eq!(store.load(&id).await.unwrap().progress, 99.0);
    }

    #[tokio::test]
    async fn cancel_flag_lifecycle() {
        let store = MemoryJobStore::new();
        let id = store.create(job(0)).await.unwrap();

        assert!(!store.cancel_requested(&id).await.unwrap());
        store.request_cancel(&id).await.unwrap();
        assert!(store.cancel_requested(&id).await.unwrap());
        store.clear_cancel(&id).await.unwrap();
        assert!(!store.cancel_requested(&id).await.unwrap());
    }

    #[tokio::test]
    async fn exactly_one_success_commits() {
        let store = MemoryJobStore::new();
        let id = store.create(job(0)).await.unwrap();
        store
            .transition(
                &id,
                &[JobStatus::Queued],
                JobStatus::Running,
                TransitionPatch::begin_attempt(),
            )
            .await
            .unwrap();

        let first = store
            .transition(&id, &[JobStatus::Running], JobStatus::Succeeded, TransitionPatch::default())
            .await
            .unwrap();
        assert_eq!(first.status, JobStatus::Succeeded);

        // Redelivered completion is a no-op, not a second commit.
        let replay = store
            .transition(&id, &[JobStatus::Running], JobStatus::Succeeded, TransitionPatch::default())
            .await
            .unwrap();
        assert_eq!(replay.finished_at, first.finished_at);
    }
}
