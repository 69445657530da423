//! Thumbnail Pipeline
//!
//! Image-thumbnailing service built around a bounded three-stage job
//! pipeline: images arrive by URL or as raw bytes, are resized to a fixed
//! box and written to blob storage.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Pipeline**: bounded queues and worker pools for fetch, transform and
//!   persist, a single-use reply channel per job, caller timeouts and staged
//!   shutdown
//! - **I/O**: HTTP fetching with reqwest and blob writes through object_store
//! - **Transform**: decode, resize and re-encode with the image crate
//! - **Server**: thin axum surface mapping job outcomes to HTTP responses
//!
//! # Usage
//!
//! ```no_run
//! use thumbnail_pipeline::{start_pipeline, Config, Metrics};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let pipeline = start_pipeline(&config, Metrics::new())?;
//!     pipeline.submit_from_url("https://example.com/cat.jpg").await?;
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod server;
pub mod transform;

pub use config::Config;
pub use error::{JobError, JobOutcome};
pub use io::{BlobStore, FetchClient, ObjectBlobStore, ReqwestFetchClient};
pub use pipeline::{Collaborators, JobSubmitter, Metrics, MetricsReporter, Pipeline, PipelineConfig};
pub use transform::{ImageResizer, ImageTransformer, ResizeStrategy, TargetBox};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Translate file configuration into the orchestrator's settings.
pub fn pipeline_config(config: &Config) -> PipelineConfig {
    let p = &config.processing;
    PipelineConfig {
        fetch_workers: p.fetch_workers,
        transform_workers: p.transform_workers,
        persist_workers: p.persist_workers,
        fetch_queue: p.fetch_queue_capacity(),
        transform_queue: p.transform_queue_capacity(),
        persist_queue: p.persist_queue_capacity(),
        job_timeout: Duration::from_secs(p.job_timeout_secs),
        max_image_size: p.max_image_size_bytes,
        target: TargetBox {
            width: config.transform.width,
            height: config.transform.height,
            strategy: config.transform.strategy,
        },
    }
}

/// Build the production collaborators and start the pipeline.
///
/// Must be called from within a Tokio runtime.
pub fn start_pipeline(config: &Config, metrics: Arc<Metrics>) -> Result<Pipeline> {
    config.validate()?;

    tracing::info!("Writing thumbnails to: {}", config.storage.path_display());

    let collaborators = Collaborators {
        fetch_client: Arc::new(ReqwestFetchClient::from_config(config)?),
        transformer: Arc::new(ImageResizer::new()),
        blob_store: Arc::new(ObjectBlobStore::from_config(&config.storage)?),
    };

    let settings = pipeline_config(config);
    tracing::info!(
        "Starting pipeline: {} fetch, {} transform, {} persist workers, timeout {:?}",
        settings.fetch_workers,
        settings.transform_workers,
        settings.persist_workers,
        settings.job_timeout
    );

    Ok(Pipeline::start(settings, collaborators, metrics))
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
