//! S3-compatible object store backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::storage::{validate_key, PutResult, Storage};

/// Configuration for the object-store backend.
#[derive(Debug, Clone)]
pub struct ObjectStorageConfig {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket: String,
    /// Region ("auto" for R2-style providers)
    pub region: String,
    /// Optional public base for unsigned URLs; presigned URLs are used when absent
    pub public_base_url: Option<String>,
}

impl ObjectStorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("STORAGE_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("STORAGE_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("STORAGE_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("STORAGE_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("STORAGE_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("STORAGE_SECRET_ACCESS_KEY not set"))?,
            bucket: std::env::var("STORAGE_BUCKET")
                .map_err(|_| StorageError::config_error("STORAGE_BUCKET not set"))?,
            region: std::env::var("STORAGE_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_base_url: std::env::var("STORAGE_PUBLIC_BASE_URL")
                .ok()
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }
}

/// S3-compatible object storage client.
#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl ObjectStorage {
    /// Create a new client from configuration.
    pub async fn new(config: ObjectStorageConfig) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "vget",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket,
            public_base_url: config.public_base_url,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(ObjectStorageConfig::from_env()?).await
    }

    fn map_sdk_error(e: impl std::fmt::Display, key: &str) -> StorageError {
        let text = e.to_string();
        if text.contains("NoSuchKey") || text.contains("NotFound") {
            StorageError::not_found(key)
        } else if text.contains("QuotaExceeded") || text.contains("EntityTooLarge") {
            StorageError::quota_exceeded(text)
        } else {
            StorageError::unavailable(text)
        }
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<PutResult> {
        validate_key(key)?;
        debug!("uploading {} to {}", path.display(), key);

        let size_bytes = tokio::fs::metadata(path).await?.len();
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::unavailable(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(aws_sdk_s3::error::DisplayErrorContext(e), key))?;

        Ok(PutResult { size_bytes })
    }

    async fn put_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<PutResult> {
        validate_key(key)?;
        let size_bytes = data.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(aws_sdk_s3::error::DisplayErrorContext(e), key))?;

        Ok(PutResult { size_bytes })
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(aws_sdk_s3::error::DisplayErrorContext(e), key))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::unavailable(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;

        // S3 deletes are idempotent and do not report prior existence, so
        // check first to honor the contract's bool.
        let existed = self.exists(key).await?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(aws_sdk_s3::error::DisplayErrorContext(e), key))?;

        Ok(existed)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let text = aws_sdk_s3::error::DisplayErrorContext(e).to_string();
                if text.contains("NotFound") || text.contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(StorageError::unavailable(text))
                }
            }
        }
    }

    async fn url_for(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        validate_key(key)?;

        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{}", base, key));
        }

        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}
