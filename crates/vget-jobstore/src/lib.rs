//! Durable job persistence for the vget backend.
//!
//! This crate provides:
//! - The [`JobStore`] contract: create/load/list plus `transition`, the
//!   single mutation primitive for lifecycle changes
//! - Monotone progress updates for running jobs
//! - The cross-process cancel flag the orchestrator sets and workers poll
//! - An in-memory backend and a Redis backend

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use redis_store::{RedisJobStore, RedisJobStoreConfig};
pub use store::{JobFilter, JobPage, JobStore, TransitionPatch};
