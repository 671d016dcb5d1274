//! Redis-backed job store.
//!
//! Rows are JSON documents keyed by job id, indexed by a creation-time
//! sorted set for listing. Transitions take a short-lived per-row lock
//! (SET NX with TTL) so concurrent workers serialize on the same id.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::AsyncCommands;
use tracing::{debug, warn};

use vget_models::{Job, JobId, JobStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    apply_transition, decode_cursor, encode_cursor, JobFilter, JobPage, JobStore,
    TransitionPatch,
};

const JOB_KEY_PREFIX: &str = "vget:job:";
const LOCK_KEY_PREFIX: &str = "vget:job:lock:";
const CANCEL_KEY_PREFIX: &str = "vget:job:cancel:";
const INDEX_KEY: &str = "vget:jobs:index";

/// Row lock TTL; long enough for a read-modify-write, short enough that a
/// crashed holder does not wedge the id.
const LOCK_TTL_MS: u64 = 5_000;

/// How long a transition waits for the row lock before giving up.
const LOCK_WAIT: Duration = Duration::from_secs(5);

/// Cancel flags expire on their own as a backstop for abandoned jobs.
const CANCEL_TTL_SECS: u64 = 24 * 3600;

/// Configuration for the Redis job store.
#[derive(Debug, Clone)]
pub struct RedisJobStoreConfig {
    /// Redis URL
    pub redis_url: String,
}

impl Default for RedisJobStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}

impl RedisJobStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }
}

/// Job store backed by Redis.
pub struct RedisJobStore {
    client: redis::Client,
}

impl RedisJobStore {
    /// Create a new store.
    pub fn new(config: RedisJobStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(RedisJobStoreConfig::from_env())
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn job_key(id: &JobId) -> String {
        format!("{}{}", JOB_KEY_PREFIX, id)
    }

    async fn read_job(
        conn: &mut redis::aio::MultiplexedConnection,
        id: &JobId,
    ) -> StoreResult<Job> {
        let raw: Option<String> = conn.get(Self::job_key(id)).await?;
        let raw = raw.ok_or_else(|| StoreError::not_found(id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write_job(
        conn: &mut redis::aio::MultiplexedConnection,
        job: &Job,
    ) -> StoreResult<()> {
        let payload = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(Self::job_key(&job.id), payload).await?;
        Ok(())
    }

    /// Acquire the per-row lock, retrying with jittered sleeps until the
    /// wait budget runs out.
    async fn lock_row(&self, id: &JobId) -> StoreResult<RowLock> {
        let lock_key = format!("{}{}", LOCK_KEY_PREFIX, id);
        let token = uuid_token();
        let deadline = tokio::time::Instant::now() + LOCK_WAIT;

        loop {
            let mut conn = self.conn().await?;
            let acquired: bool = redis::cmd("SET")
                .arg(&lock_key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL_MS)
                .query_async(&mut conn)
                .await
                .unwrap_or(false);

            if acquired {
                debug!("acquired row lock for {}", id);
                return Ok(RowLock {
                    client: self.client.clone(),
                    key: lock_key,
                });
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(StoreError::backend(format!(
                    "timed out waiting for row lock on {}",
                    id
                )));
            }

            let jitter = rand::rng().random_range(10..50);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }
    }
}

/// Held row lock; released on drop.
struct RowLock {
    client: redis::Client,
    key: String,
}

impl Drop for RowLock {
    fn drop(&mut self) {
        let client = self.client.clone();
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let _: Result<(), _> = conn.del(&key).await;
            }
        });
    }
}

fn uuid_token() -> String {
    // Unique enough for a lock token; the TTL is the real safety net.
    format!("{:x}", rand::rng().random::<u128>())
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: Job) -> StoreResult<JobId> {
        let mut conn = self.conn().await?;
        let id = job.id.clone();

        Self::write_job(&mut conn, &job).await?;
        conn.zadd::<_, _, _, ()>(
            INDEX_KEY,
            id.to_string(),
            job.created_at.timestamp_millis() as f64,
        )
        .await?;

        Ok(id)
    }

    async fn load(&self, id: &JobId) -> StoreResult<Job> {
        let mut conn = self.conn().await?;
        Self::read_job(&mut conn, id).await
    }

    async fn list(
        &self,
        filter: JobFilter,
        page: JobPage,
    ) -> StoreResult<(Vec<Job>, Option<String>)> {
        let mut conn = self.conn().await?;

        let max_score = match &page.cursor {
            Some(cursor) => {
                let (millis, _) = decode_cursor(cursor)?;
                format!("({}", millis)
            }
            None => "+inf".to_string(),
        };

        let mut out = Vec::with_capacity(page.limit);
        let mut offset = 0isize;
        let batch = (page.limit.max(1) * 2) as isize;

        // Walk the index newest-first, filtering as we go; status filtering
        // can thin a batch so keep fetching until the page fills or the
        // index runs out.
        loop {
            let ids: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
                .arg(INDEX_KEY)
                .arg(&max_score)
                .arg("-inf")
                .arg("LIMIT")
                .arg(offset)
                .arg(batch)
                .query_async(&mut conn)
                .await?;

            if ids.is_empty() {
                return Ok((out, None));
            }

            for raw_id in &ids {
                let id = JobId::from(raw_id.as_str());
                let job = match Self::read_job(&mut conn, &id).await {
                    Ok(job) => job,
                    Err(StoreError::NotFound(_)) => {
                        warn!("index references missing job {}", id);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                if filter.status.map_or(true, |s| job.status == s) {
                    if out.len() == page.limit {
                        let cursor = {
                            let last = out.last().expect("page is full");
                            encode_cursor(last.created_at, &last.id)
                        };
                        return Ok((out, Some(cursor)));
                    }
                    out.push(job);
                }
            }

            offset += ids.len() as isize;
        }
    }

    async fn transition(
        &self,
        id: &JobId,
        from_states: &[JobStatus],
        to_state: JobStatus,
        patch: TransitionPatch,
    ) -> StoreResult<Job> {
        let _lock = self.lock_row(id).await?;
        let mut conn = self.conn().await?;

        let job = Self::read_job(&mut conn, id).await?;
        match apply_transition(&job, from_states, to_state, &patch)? {
            Some(next) => {
                Self::write_job(&mut conn, &next).await?;
                Ok(next)
            }
            None => Ok(job),
        }
    }

    async fn touch_progress(&self, id: &JobId, percent: f64) -> StoreResult<()> {
        let _lock = self.lock_row(id).await?;
        let mut conn = self.conn().await?;

        let mut job = Self::read_job(&mut conn, id).await?;
        if job.status == JobStatus::Running {
            let bounded = percent.clamp(0.0, 99.0);
            if bounded > job.progress {
                job.progress = bounded;
                Self::write_job(&mut conn, &job).await?;
            }
        }
        Ok(())
    }

    async fn request_cancel(&self, id: &JobId) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        // Touch the row first so unknown ids surface as NotFound.
        Self::read_job(&mut conn, id).await?;
        conn.set_ex::<_, _, ()>(format!("{}{}", CANCEL_KEY_PREFIX, id), 1, CANCEL_TTL_SECS)
            .await?;
        Ok(())
    }

    async fn cancel_requested(&self, id: &JobId) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn
            .exists(format!("{}{}", CANCEL_KEY_PREFIX, id))
            .await?)
    }

    async fn clear_cancel(&self, id: &JobId) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(format!("{}{}", CANCEL_KEY_PREFIX, id)).await?;
        Ok(())
    }

    async fn probe(&self) -> bool {
        match self.conn().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}
