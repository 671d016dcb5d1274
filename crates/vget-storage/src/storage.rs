//! The storage contract shared by both backends.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{StorageError, StorageResult};
use crate::local::LocalStorage;
use crate::object::{ObjectStorage, ObjectStorageConfig};

/// Result of a successful put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutResult {
    /// Bytes written
    pub size_bytes: u64,
}

/// Outcome of a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

/// Uniform storage contract over the filesystem and object-store backends.
///
/// Keys use forward-slash segments. Overwrites are allowed and the last
/// writer wins; callers rely on job-store transition idempotence rather
/// than storage exclusivity.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Streaming upload from a local file. Overwrites.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str)
        -> StorageResult<PutResult>;

    /// Upload an in-memory buffer. Overwrites.
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str)
        -> StorageResult<PutResult>;

    /// Fetch an object into memory.
    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Idempotent delete; returns whether anything was removed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Whether the key currently exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Time-limited URL for the object. The local backend serves through an
    /// adjacent static handler and ignores the TTL.
    async fn url_for(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Health probe: a real put-get-delete round trip over a unique key.
    /// Connectivity-only checks are not enough to catch read-only mounts or
    /// expired write credentials.
    async fn probe(&self) -> Health {
        let key = format!("probes/{}", uuid::Uuid::new_v4());
        let payload = b"probe".to_vec();

        let round_trip = async {
            self.put_bytes(&key, payload.clone(), "application/octet-stream")
                .await?;
            let read = self.get_bytes(&key).await?;
            self.delete(&key).await?;
            if read == payload {
                Ok(())
            } else {
                Err(StorageError::unavailable("probe read back wrong bytes"))
            }
        };

        match round_trip.await {
            Ok(()) => Health::Healthy,
            Err(e) => {
                warn!("storage probe failed: {}", e);
                Health::Unhealthy
            }
        }
    }
}

/// Reject keys that escape the bucket/root or use backslash separators.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::invalid_key(key));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// Which backend to construct.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local {
        root: String,
        public_base_url: Option<String>,
    },
    ObjectStore(ObjectStorageConfig),
}

impl StorageConfig {
    /// Read the backend selection and its settings from the environment.
    pub fn from_env() -> StorageResult<Self> {
        let backend =
            std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "local".to_string());
        match backend.as_str() {
            "local" => Ok(Self::Local {
                root: std::env::var("STORAGE_LOCAL_ROOT")
                    .map_err(|_| StorageError::config_error("STORAGE_LOCAL_ROOT not set"))?,
                public_base_url: std::env::var("STORAGE_PUBLIC_BASE_URL").ok(),
            }),
            "object_store" => Ok(Self::ObjectStore(ObjectStorageConfig::from_env()?)),
            other => Err(StorageError::config_error(format!(
                "STORAGE_BACKEND must be 'local' or 'object_store', got '{}'",
                other
            ))),
        }
    }

    /// Construct the configured backend.
    pub async fn connect(self) -> StorageResult<Arc<dyn Storage>> {
        match self {
            StorageConfig::Local {
                root,
                public_base_url,
            } => Ok(Arc::new(LocalStorage::new(root, public_base_url).await?)),
            StorageConfig::ObjectStore(config) => {
                Ok(Arc::new(ObjectStorage::new(config).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("jobs/j1/video.mp4").is_ok());
        assert!(validate_key("jobs/j1/subtitles/a.en.srt").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a\\b").is_err());
    }
}
