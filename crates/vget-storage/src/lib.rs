//! Artifact storage for the vget backend.
//!
//! This crate provides:
//! - The [`Storage`] contract (put/get/delete/exists/url_for/probe)
//! - A local-filesystem backend for single-node deployments
//! - An S3-compatible object-store backend
//!
//! Keys use forward-slash segments; backends are stateless and the last
//! writer wins on concurrent puts to the same key.

pub mod error;
pub mod local;
pub mod object;
pub mod storage;

pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use object::{ObjectStorage, ObjectStorageConfig};
pub use storage::{Health, PutResult, Storage, StorageConfig};
