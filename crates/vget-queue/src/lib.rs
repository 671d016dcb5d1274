//! Job delivery and progress fan-out for the vget backend.
//!
//! This crate provides:
//! - The [`Queue`] contract: at-least-once delivery of job payloads with
//!   visibility leases, delayed enqueue, retry backoff and a dead-letter
//!   side channel
//! - An in-memory backend and a Redis Streams backend
//! - The in-process [`ProgressBus`] fanning progress events out to live
//!   subscribers with bounded per-subscriber buffering

pub mod error;
pub mod memory;
pub mod payload;
pub mod progress;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use payload::{JobPayload, Lease};
pub use progress::{ProgressBus, Subscription};
pub use queue::{retry_backoff, Queue, QueueBackendConfig};
pub use redis_queue::{RedisQueue, RedisQueueConfig};
