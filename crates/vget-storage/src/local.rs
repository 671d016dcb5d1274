//! Local filesystem backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::storage::{validate_key, PutResult, Storage};

/// Storage backed by a directory tree under a configured root.
///
/// `url_for` produces URLs under an adjacent static handler when a public
/// base URL is configured, and `file://` URLs otherwise.
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalStorage {
    /// Create the backend, ensuring the root directory exists.
    pub async fn new(
        root: impl Into<PathBuf>,
        public_base_url: Option<String>,
    ) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::config_error(format!("cannot create root: {}", e)))?;
        Ok(Self {
            root,
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn map_io(e: std::io::Error, key: &str) -> StorageError {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::not_found(key),
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => {
                StorageError::quota_exceeded(e.to_string())
            }
            _ => StorageError::unavailable(e.to_string()),
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> StorageResult<PutResult> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(e, key))?;
        }

        let size_bytes = tokio::fs::copy(path, &dest)
            .await
            .map_err(|e| Self::map_io(e, key))?;

        debug!("stored {} ({} bytes)", key, size_bytes);
        Ok(PutResult { size_bytes })
    }

    async fn put_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<PutResult> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(e, key))?;
        }

        let size_bytes = data.len() as u64;
        tokio::fs::write(&dest, data)
            .await
            .map_err(|e| Self::map_io(e, key))?;

        Ok(PutResult { size_bytes })
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| Self::map_io(e, key))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io(e, key)),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Self::map_io(e, key))?)
    }

    async fn url_for(&self, key: &str, _ttl: Duration) -> StorageResult<String> {
        validate_key(key)?;
        match &self.public_base_url {
            Some(base) => Ok(format!("{}/{}", base, key)),
            None => Ok(format!("file://{}", self.root.join(key).display())),
        }
    }
}
