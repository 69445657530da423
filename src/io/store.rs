//! Thumbnail storage.
//!
//! Thumbnails are written through `object_store`, so the same code path
//! serves a local directory and an S3 bucket. The S3 client is tuned for many
//! small concurrent writes from the persist worker pool.

use crate::config::StorageConfig;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore, PutPayload, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Blob store collaborator used by the persist stage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Generate a collision-resistant name (without extension).
    fn new_unique_name(&self) -> Result<String>;

    /// Write `data` under `name`.
    async fn write(&self, name: &str, data: Bytes) -> Result<()>;
}

/// [`BlobStore`] over any `object_store` backend, naming blobs with UUID v4.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    /// Key prefix inside the store ("" for local stores)
    prefix: String,
}

impl ObjectBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Build the store described by the storage configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store = create_output_store(config)?;
        Ok(Self::new(store, get_output_prefix(config)))
    }

    fn location(&self, name: &str) -> Path {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            Path::from(name)
        } else {
            Path::from(format!("{}/{}", prefix, name))
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    fn new_unique_name(&self) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn write(&self, name: &str, data: Bytes) -> Result<()> {
        let location = self.location(name);
        self.store.put(&location, PutPayload::from(data)).await?;
        Ok(())
    }
}

/// Client options for S3 access from a busy persist pool.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(30))
        .with_pool_idle_timeout(Duration::from_secs(90))
        .with_pool_max_idle_per_host(64)
}

/// Retry configuration for transient S3 failures (429 and 5xx).
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(10),
    }
}

/// Create an authenticated S3 client for writing.
///
/// Credentials and region are loaded from (in order):
/// - Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION)
/// - AWS config files
/// - EC2 instance profile (IMDS)
fn create_authenticated_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating authenticated S3 client for bucket: {}", bucket);

    let builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config())
        .with_virtual_hosted_style_request(true);

    Ok(Arc::new(builder.build()?))
}

/// Create the thumbnail store.
/// Uses LocalFileSystem if local_path is set, otherwise S3 with credentials.
pub fn create_output_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match (&config.local_path, &config.bucket) {
        (Some(local_path), _) => {
            let path = std::path::Path::new(local_path);
            if !path.exists() {
                std::fs::create_dir_all(path)?;
            }
            tracing::info!("Creating LocalFileSystem store at: {}", path.display());
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        (_, Some(bucket)) => create_authenticated_store(bucket),
        _ => anyhow::bail!("Invalid config: no storage destination"),
    }
}

/// Key prefix for thumbnails.
/// Empty for local stores, where the directory is baked into the store.
pub fn get_output_prefix(config: &StorageConfig) -> &str {
    if config.is_local() {
        ""
    } else {
        config.prefix.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_unique_names() {
        let store = ObjectBlobStore::new(Arc::new(InMemory::new()), "");
        let names: HashSet<String> = (0..1000).map(|_| store.new_unique_name().unwrap()).collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_location_with_prefix() {
        let store = ObjectBlobStore::new(Arc::new(InMemory::new()), "thumbs/");
        assert_eq!(store.location("a.png").as_ref(), "thumbs/a.png");

        let store = ObjectBlobStore::new(Arc::new(InMemory::new()), "");
        assert_eq!(store.location("a.png").as_ref(), "a.png");
    }

    #[tokio::test]
    async fn test_write_in_memory() {
        let inner = Arc::new(InMemory::new());
        let store = ObjectBlobStore::new(inner.clone(), "thumbs");

        store.write("x.png", Bytes::from_static(b"png-bytes")).await.unwrap();

        let got = inner.get(&Path::from("thumbs/x.png")).await.unwrap().bytes().await.unwrap();
        assert_eq!(got.as_ref(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_write_local_directory() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("thumbnails");
        let config = StorageConfig {
            local_path: Some(out.to_string_lossy().to_string()),
            bucket: None,
            prefix: None,
        };

        let store = ObjectBlobStore::from_config(&config).unwrap();
        assert!(out.exists());

        store.write("thumb.jpg", Bytes::from_static(b"jpeg")).await.unwrap();
        let written = std::fs::read(out.join("thumb.jpg")).unwrap();
        assert_eq!(written, b"jpeg");
    }

    #[test]
    fn test_output_prefix() {
        let local = StorageConfig {
            local_path: Some("/tmp/thumbs".to_string()),
            bucket: None,
            prefix: None,
        };
        assert_eq!(get_output_prefix(&local), "");

        let s3 = StorageConfig {
            local_path: None,
            bucket: Some("bucket".to_string()),
            prefix: Some("thumbs/v1".to_string()),
        };
        assert_eq!(get_output_prefix(&s3), "thumbs/v1");
    }

    #[test]
    fn test_no_destination() {
        let config = StorageConfig {
            local_path: None,
            bucket: None,
            prefix: None,
        };
        assert!(create_output_store(&config).is_err());
    }
}
