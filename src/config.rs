//! Configuration for the thumbnail service.

use crate::transform::ResizeStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration. Every section has defaults, so an empty file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pools, queues and job limits
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Thumbnail geometry
    #[serde(default)]
    pub transform: TransformConfig,

    /// Where thumbnails are written
    #[serde(default)]
    pub storage: StorageConfig,

    /// Outbound HTTP client used by the fetch stage
    #[serde(default)]
    pub http_client: HttpClientConfig,

    /// HTTP server and reporting
    #[serde(default)]
    pub server: ServerConfig,
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of fetch workers (bounds concurrent outbound downloads)
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// Number of transform workers
    #[serde(default = "default_transform_workers")]
    pub transform_workers: usize,

    /// Number of persist workers
    #[serde(default = "default_persist_workers")]
    pub persist_workers: usize,

    /// Fetch queue capacity (defaults to fetch_workers)
    #[serde(default)]
    pub fetch_queue_size: Option<usize>,

    /// Transform queue capacity (defaults to transform_workers)
    #[serde(default)]
    pub transform_queue_size: Option<usize>,

    /// Persist queue capacity (defaults to persist_workers)
    #[serde(default)]
    pub persist_queue_size: Option<usize>,

    /// How long a caller waits for its job, in seconds
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Maximum accepted source image size
    #[serde(default = "default_max_image_size_bytes")]
    pub max_image_size_bytes: u64,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl ProcessingConfig {
    pub fn fetch_queue_capacity(&self) -> usize {
        self.fetch_queue_size.unwrap_or(self.fetch_workers)
    }

    pub fn transform_queue_capacity(&self) -> usize {
        self.transform_queue_size.unwrap_or(self.transform_workers)
    }

    pub fn persist_queue_capacity(&self) -> usize {
        self.persist_queue_size.unwrap_or(self.persist_workers)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            fetch_workers: 100,
            transform_workers: 10,
            persist_workers: 10,
            fetch_queue_size: None,
            transform_queue_size: None,
            persist_queue_size: None,
            job_timeout_secs: 10,
            max_image_size_bytes: 15 * 1024 * 1024,
            worker_threads: None,
        }
    }
}

/// Thumbnail geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Target width in pixels
    #[serde(default = "default_thumbnail_side")]
    pub width: u32,

    /// Target height in pixels
    #[serde(default = "default_thumbnail_side")]
    pub height: u32,

    /// crop (fill the box exactly) or fit (preserve aspect ratio)
    #[serde(default)]
    pub strategy: ResizeStrategy,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            strategy: ResizeStrategy::Crop,
        }
    }
}

/// Thumbnail storage destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local directory for thumbnails.
    /// Mutually exclusive with bucket/prefix.
    #[serde(default)]
    pub local_path: Option<String>,

    /// S3 bucket (required if local_path is not set)
    #[serde(default)]
    pub bucket: Option<String>,

    /// S3 key prefix (required if local_path is not set)
    #[serde(default)]
    pub prefix: Option<String>,
}

impl StorageConfig {
    /// Check if thumbnails go to the local filesystem.
    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }

    /// Destination as a display string (local path or s3:// URI).
    pub fn path_display(&self) -> String {
        if let Some(path) = &self.local_path {
            path.clone()
        } else {
            format!(
                "s3://{}/{}",
                self.bucket.as_deref().unwrap_or(""),
                self.prefix.as_deref().unwrap_or("")
            )
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: Some(default_local_path()),
            bucket: None,
            prefix: None,
        }
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Drop idle pooled connections after this many seconds
    #[serde(default = "default_idle_conn_timeout_secs")]
    pub idle_conn_timeout_secs: u64,

    /// Maximum idle pooled connections per host
    #[serde(default = "default_max_idle_conns_per_host")]
    pub max_idle_conns_per_host: usize,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            idle_conn_timeout_secs: 90,
            max_idle_conns_per_host: 100,
            connect_timeout_secs: 5,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Enable periodic metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON on shutdown
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.storage.local_path, &self.storage.bucket, &self.storage.prefix) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                anyhow::bail!("Cannot specify both local_path and bucket/prefix");
            }
            (None, None, _) | (None, _, None) => {
                anyhow::bail!("Must specify either local_path or both bucket and prefix");
            }
            _ => {}
        }

        let p = &self.processing;
        if p.fetch_workers == 0 || p.transform_workers == 0 || p.persist_workers == 0 {
            anyhow::bail!("Worker counts must be > 0");
        }
        if p.fetch_queue_capacity() == 0 || p.transform_queue_capacity() == 0 || p.persist_queue_capacity() == 0 {
            anyhow::bail!("Queue sizes must be > 0");
        }
        if p.job_timeout_secs == 0 {
            anyhow::bail!("Job timeout must be > 0");
        }
        if p.max_image_size_bytes == 0 {
            anyhow::bail!("Maximum image size must be > 0");
        }
        if self.transform.width == 0 || self.transform.height == 0 {
            anyhow::bail!("Thumbnail dimensions must be > 0");
        }
        if self.server.enable_metrics && self.server.metrics_interval_secs == 0 {
            anyhow::bail!("Metrics interval must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_fetch_workers() -> usize { 100 }
fn default_transform_workers() -> usize { 10 }
fn default_persist_workers() -> usize { 10 }
fn default_job_timeout_secs() -> u64 { 10 }
fn default_max_image_size_bytes() -> u64 { 15 * 1024 * 1024 }
fn default_thumbnail_side() -> u32 { 100 }
fn default_local_path() -> String { "thumbnails".to_string() }
fn default_idle_conn_timeout_secs() -> u64 { 90 }
fn default_max_idle_conns_per_host() -> usize { 100 }
fn default_connect_timeout_secs() -> u64 { 5 }
fn default_addr() -> String { "localhost:3000".to_string() }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_processing() {
        let p = ProcessingConfig::default();
        assert_eq!(p.fetch_workers, 100);
        assert_eq!(p.transform_workers, 10);
        assert_eq!(p.persist_workers, 10);
        assert_eq!(p.job_timeout_secs, 10);
        assert_eq!(p.max_image_size_bytes, 15 * 1024 * 1024);
    }

    #[test]
    fn test_queue_capacity_follows_worker_count() {
        let mut p = ProcessingConfig {
            fetch_workers: 7,
            ..Default::default()
        };
        assert_eq!(p.fetch_queue_capacity(), 7);
        assert_eq!(p.transform_queue_capacity(), 10);

        p.fetch_queue_size = Some(3);
        assert_eq!(p.fetch_queue_capacity(), 3);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.processing.fetch_workers, 100);
        assert_eq!(config.transform.strategy, ResizeStrategy::Crop);
        assert_eq!(config.storage.local_path.as_deref(), Some("thumbnails"));
        assert_eq!(config.server.addr, "localhost:3000");
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
processing:
  transform_workers: 4
  job_timeout_secs: 3
transform:
  width: 64
  strategy: fit
storage:
  bucket: thumbs
  prefix: v1
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.processing.transform_workers, 4);
        assert_eq!(config.processing.transform_queue_capacity(), 4);
        assert_eq!(config.processing.fetch_workers, 100);
        assert_eq!(config.processing.job_timeout_secs, 3);
        assert_eq!(config.transform.width, 64);
        assert_eq!(config.transform.height, 100);
        assert_eq!(config.transform.strategy, ResizeStrategy::Fit);
        // An explicit storage section replaces the default local path
        assert!(config.storage.local_path.is_none());
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.path_display(), "s3://thumbs/v1");
    }

    #[test]
    fn test_json_roundtrip_through_yaml() {
        let config = Config::from_json(r#"{"processing": {"persist_workers": 2}}"#).unwrap();
        let yaml = config.to_yaml().unwrap();
        let reparsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(reparsed.processing.persist_workers, 2);
    }

    #[test]
    fn test_validation_storage() {
        let mut config = Config::default();
        config.storage.bucket = Some("bucket".to_string());
        assert!(config.validate().is_err());

        config.storage.local_path = None;
        assert!(config.validate().is_err());

        config.storage.prefix = Some("thumbs".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_limits() {
        let mut config = Config::default();
        config.processing.transform_workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processing.persist_queue_size = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processing.job_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transform.height = 0;
        assert!(config.validate().is_err());
    }
}
