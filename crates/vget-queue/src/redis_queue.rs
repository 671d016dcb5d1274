//! Redis Streams queue backend.
//!
//! Payloads live on a stream consumed through a consumer group. A reserve
//! first promotes due entries from the scheduled sorted set, then reclaims
//! pending entries whose idle time exceeds the visibility window (crashed
//! consumers), then reads new entries. Dead letters go to a separate
//! stream with the failure reason attached.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vget_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::payload::{JobPayload, Lease};
use crate::queue::Queue;

/// Dedup keys outlive any reasonable delivery cycle.
const DEDUP_TTL_SECS: u64 = 3600;

/// Configuration for the Redis queue.
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for payloads
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Sorted set holding delayed payloads
    pub scheduled_key: String,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vget:jobs".to_string(),
            consumer_group: "vget:workers".to_string(),
            dlq_stream_name: "vget:dlq".to_string(),
            scheduled_key: "vget:scheduled".to_string(),
        }
    }
}

impl RedisQueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or(defaults.dlq_stream_name),
            scheduled_key: std::env::var("QUEUE_SCHEDULED_KEY")
                .unwrap_or(defaults.scheduled_key),
        }
    }
}

/// Queue backed by Redis Streams.
pub struct RedisQueue {
    client: redis::Client,
    config: RedisQueueConfig,
    consumer_name: String,
}

impl RedisQueue {
    /// Create a new queue client.
    pub fn new(config: RedisQueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(RedisQueueConfig::from_env())
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("created consumer group {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("consumer group {} already exists", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn dedup_key(&self, payload: &JobPayload) -> String {
        format!("vget:queue:dedup:{}", payload.dedup_key())
    }

    /// Append a payload to the stream, bypassing dedup (used for scheduled
    /// promotion and nack requeues where the payload is already live).
    async fn push_to_stream(
        conn: &mut redis::aio::MultiplexedConnection,
        stream: &str,
        payload: &JobPayload,
    ) -> QueueResult<String> {
        let raw = serde_json::to_string(payload)?;
        let message_id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg("payload")
            .arg(&raw)
            .query_async(conn)
            .await?;
        Ok(message_id)
    }

    /// Move due entries from the scheduled set onto the stream.
    async fn promote_scheduled(&self) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let now = chrono::Utc::now().timestamp() as f64;

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.config.scheduled_key)
            .arg(0)
            .arg(now)
            .query_async(&mut conn)
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        let mut moved = 0;
        for raw in &due {
            // Remove first so two promoters cannot double-deliver the same
            // scheduled entry.
            let removed: u64 = conn.zrem(&self.config.scheduled_key, raw).await?;
            if removed == 0 {
                continue;
            }

            match serde_json::from_str::<JobPayload>(raw) {
                Ok(payload) => {
                    Self::push_to_stream(&mut conn, &self.config.stream_name, &payload).await?;
                    moved += 1;
                }
                Err(e) => {
                    warn!("dropping malformed scheduled payload: {}", e);
                }
            }
        }

        if moved > 0 {
            debug!("promoted {} scheduled payloads", moved);
        }
        Ok(moved)
    }

    /// Reclaim one pending entry idle past the visibility window.
    async fn claim_stale(&self, min_idle: Duration) -> QueueResult<Option<(String, String)>> {
        let mut conn = self.conn().await?;

        let reply: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        for entry in reply.claimed {
            if let Some(redis::Value::BulkString(raw)) = entry.map.get("payload") {
                let raw = String::from_utf8_lossy(raw).to_string();
                info!("reclaimed stale delivery {}", entry.id);
                return Ok(Some((entry.id, raw)));
            }
            // Entry without a payload field is junk; drop it.
            self.ack_ids(&[entry.id]).await?;
        }

        Ok(None)
    }

    /// Read one new entry for this consumer.
    async fn read_new(&self) -> QueueResult<Option<(String, String)>> {
        let mut conn = self.conn().await?;

        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(100)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                if let Some(redis::Value::BulkString(raw)) = entry.map.get("payload") {
                    return Ok(Some((entry.id, String::from_utf8_lossy(raw).to_string())));
                }
                self.ack_ids(&[entry.id]).await?;
            }
        }

        Ok(None)
    }

    async fn ack_ids(&self, message_ids: &[String]) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        for id in message_ids {
            redis::cmd("XACK")
                .arg(&self.config.stream_name)
                .arg(&self.config.consumer_group)
                .arg(id)
                .query_async::<()>(&mut conn)
                .await?;
            redis::cmd("XDEL")
                .arg(&self.config.stream_name)
                .arg(id)
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(())
    }

    /// Parse a reserved entry, dead-lettering malformed payloads.
    async fn lease_from_entry(
        &self,
        message_id: String,
        raw: String,
    ) -> QueueResult<Option<Lease>> {
        match serde_json::from_str::<JobPayload>(&raw) {
            Ok(payload) => Ok(Some(Lease {
                payload,
                token: message_id,
            })),
            Err(e) => {
                warn!("malformed payload {}, dead-lettering: {}", message_id, e);
                let mut conn = self.conn().await?;
                redis::cmd("XADD")
                    .arg(&self.config.dlq_stream_name)
                    .arg("*")
                    .arg("payload")
                    .arg(&raw)
                    .arg("error")
                    .arg(format!("malformed payload: {}", e))
                    .arg("original_id")
                    .arg(&message_id)
                    .query_async::<()>(&mut conn)
                    .await?;
                self.ack_ids(&[message_id]).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn enqueue(&self, job_id: &JobId, attempt: u32, delay: Duration) -> QueueResult<()> {
        let payload = JobPayload::new(job_id.clone(), attempt);
        let mut conn = self.conn().await?;

        // Dedup: reject while the same {job_id, attempt} is live.
        let dedup_key = self.dedup_key(&payload);
        let acquired: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await
            .unwrap_or(false);
        if !acquired {
            return Err(QueueError::duplicate(payload.dedup_key()));
        }

        if delay.is_zero() {
            let message_id =
                Self::push_to_stream(&mut conn, &self.config.stream_name, &payload).await?;
            info!("enqueued {} as {}", payload.job_id, message_id);
        } else {
            let visible_at = chrono::Utc::now().timestamp() + delay.as_secs() as i64;
            let raw = serde_json::to_string(&payload)?;
            redis::cmd("ZADD")
                .arg(&self.config.scheduled_key)
                .arg(visible_at)
                .arg(&raw)
                .query_async::<()>(&mut conn)
                .await?;
            info!(
                "scheduled {} for delivery in {}s",
                payload.job_id,
                delay.as_secs()
            );
        }

        Ok(())
    }

    async fn reserve(&self, visibility: Duration) -> QueueResult<Option<Lease>> {
        self.promote_scheduled().await?;

        if let Some((id, raw)) = self.claim_stale(visibility).await? {
            return self.lease_from_entry(id, raw).await;
        }

        match self.read_new().await? {
            Some((id, raw)) => self.lease_from_entry(id, raw).await,
            None => Ok(None),
        }
    }

    async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        self.ack_ids(std::slice::from_ref(&lease.token)).await?;

        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.dedup_key(&lease.payload)).await?;
        debug!("acked {}", lease.token);
        Ok(())
    }

    async fn nack(&self, lease: &Lease, requeue_delay: Duration) -> QueueResult<()> {
        // Remove the delivered entry and reschedule the same payload; the
        // dedup key stays up since the payload is still live.
        self.ack_ids(std::slice::from_ref(&lease.token)).await?;

        let mut conn = self.conn().await?;
        let visible_at =
            chrono::Utc::now().timestamp() + requeue_delay.as_secs() as i64;
        let raw = serde_json::to_string(&lease.payload)?;
        redis::cmd("ZADD")
            .arg(&self.config.scheduled_key)
            .arg(visible_at)
            .arg(&raw)
            .query_async::<()>(&mut conn)
            .await?;
        conn.expire::<_, ()>(self.dedup_key(&lease.payload), DEDUP_TTL_SECS as i64)
            .await?;

        debug!(
            "nacked {}, redelivery in {}s",
            lease.token,
            requeue_delay.as_secs()
        );
        Ok(())
    }

    async fn dead_letter(&self, payload: &JobPayload, reason: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let raw = serde_json::to_string(payload)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("payload")
            .arg(&raw)
            .arg("error")
            .arg(reason)
            .query_async::<()>(&mut conn)
            .await?;
        conn.del::<_, ()>(self.dedup_key(payload)).await?;

        warn!("dead-lettered {}: {}", payload.job_id, reason);
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let stream: u64 = conn.xlen(&self.config.stream_name).await?;
        let scheduled: u64 = conn.zcard(&self.config.scheduled_key).await?;
        Ok(stream + scheduled)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
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

#[cfg(test)]
mod tests {
    use super::*;

    /// Requires a local Redis; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn enqueue_reserve_ack_against_redis() {
        let queue = RedisQueue::from_env().unwrap();
        queue.init().await.unwrap();

        let job_id = JobId::new();
        queue.enqueue(&job_id, 0, Duration::ZERO).await.unwrap();

        let mut lease = None;
        for _ in 0..50 {
            if let Some(l) = queue.reserve(Duration::from_secs(300)).await.unwrap() {
                if l.payload.job_id == job_id {
                    lease = Some(l);
                    break;
                }
                queue.ack(&l).await.unwrap();
            }
        }

        let lease = lease.expect("reserved own payload");
        assert_eq!(lease.payload.attempt, 0);
        queue.ack(&lease).await.unwrap();
    }
}
