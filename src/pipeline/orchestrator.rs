//! Pipeline orchestrator.
//!
//! [`Pipeline`] owns the three stage queues and their worker pools, and is
//! the only way jobs enter the system:
//!
//! - [`Pipeline::submit_from_url`] enters at the fetch stage
//! - [`Pipeline::submit_bytes`] enters at the transform stage
//!
//! Submission waits while the entry queue is full, then waits for the job's
//! reply for at most the configured job timeout. A timed-out job is not
//! cancelled; it keeps moving through the stages and its eventual reply is
//! discarded.
//!
//! Shutdown closes the queues front to back, waiting for each stage's
//! workers to drain their queue before closing the next one, so every job
//! already accepted reaches a terminal outcome.

use crate::error::{JobError, JobOutcome};
use crate::io::{BlobStore, FetchClient};
use crate::pipeline::job::{reply_channel, FetchJob, JobId, PersistJob, ReplyReceiver, TransformJob};
use crate::pipeline::stages::{spawn_workers, FetchStage, PersistStage, TransformStage};
use crate::pipeline::Metrics;
use crate::transform::{ImageTransformer, TargetBox};
use async_channel::Sender;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of fetch workers
    pub fetch_workers: usize,
    /// Number of transform workers
    pub transform_workers: usize,
    /// Number of persist workers
    pub persist_workers: usize,
    /// Fetch queue capacity
    pub fetch_queue: usize,
    /// Transform queue capacity
    pub transform_queue: usize,
    /// Persist queue capacity
    pub persist_queue: usize,
    /// How long a caller waits for its reply
    pub job_timeout: Duration,
    /// Maximum accepted source image size in bytes
    pub max_image_size: u64,
    /// Thumbnail geometry
    pub target: TargetBox,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_workers: 100,
            transform_workers: 10,
            persist_workers: 10,
            fetch_queue: 100,
            transform_queue: 10,
            persist_queue: 10,
            job_timeout: Duration::from_secs(10),
            max_image_size: 15 * 1024 * 1024,
            target: TargetBox::default(),
        }
    }
}

/// External collaborators the stages call into.
#[derive(Clone)]
pub struct Collaborators {
    pub fetch_client: Arc<dyn FetchClient>,
    pub transformer: Arc<dyn ImageTransformer>,
    pub blob_store: Arc<dyn BlobStore>,
}

/// Submission API consumed by the HTTP layer.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Download, resize and persist the image at `url`.
    async fn submit_from_url(&self, url: String) -> JobOutcome;

    /// Resize and persist an uploaded image.
    async fn submit_bytes(&self, image: Bytes) -> JobOutcome;
}

struct StageWorkers {
    fetch: Vec<JoinHandle<()>>,
    transform: Vec<JoinHandle<()>>,
    persist: Vec<JoinHandle<()>>,
}

/// Bounded three-stage thumbnail pipeline.
pub struct Pipeline {
    fetch_tx: Sender<FetchJob>,
    transform_tx: Sender<TransformJob>,
    persist_tx: Sender<PersistJob>,
    /// Taken by the first shutdown
    workers: Mutex<Option<StageWorkers>>,
    job_timeout: Duration,
    next_job_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    /// Create the queues and spawn every worker.
    ///
    /// Must be called from within a Tokio runtime. Zero worker counts and
    /// queue capacities are rejected by [`crate::Config::validate`]; here they
    /// are raised to one so every stage can drain.
    pub fn start(config: PipelineConfig, collaborators: Collaborators, metrics: Arc<Metrics>) -> Self {
        let (fetch_tx, fetch_rx) = async_channel::bounded(config.fetch_queue.max(1));
        let (transform_tx, transform_rx) = async_channel::bounded(config.transform_queue.max(1));
        let (persist_tx, persist_rx) = async_channel::bounded(config.persist_queue.max(1));

        tracing::info!("Fetch queue size: {}", fetch_tx.capacity().unwrap_or(0));
        tracing::info!("Transform queue size: {}", transform_tx.capacity().unwrap_or(0));
        tracing::info!("Persist queue size: {}", persist_tx.capacity().unwrap_or(0));

        let persist_stage = Arc::new(PersistStage::new(collaborators.blob_store, metrics.clone()));
        let transform_stage = Arc::new(TransformStage::new(
            collaborators.transformer,
            config.target,
            persist_tx.clone(),
            metrics.clone(),
        ));
        let fetch_stage = Arc::new(FetchStage::new(
            collaborators.fetch_client,
            config.max_image_size,
            transform_tx.clone(),
            metrics.clone(),
        ));

        let workers = StageWorkers {
            persist: spawn_workers(persist_stage, persist_rx, config.persist_workers.max(1)),
            transform: spawn_workers(transform_stage, transform_rx, config.transform_workers.max(1)),
            fetch: spawn_workers(fetch_stage, fetch_rx, config.fetch_workers.max(1)),
        };

        Self {
            fetch_tx,
            transform_tx,
            persist_tx,
            workers: Mutex::new(Some(workers)),
            job_timeout: config.job_timeout,
            next_job_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Download the image at `url`, resize it and persist the thumbnail.
    pub async fn submit_from_url(&self, url: impl Into<String>) -> JobOutcome {
        let id = self.next_id();
        let url = url.into();
        tracing::debug!(job = id, "Submitting {}", url);

        let (reply, rx) = reply_channel();
        if self.fetch_tx.send(FetchJob { id, url, reply }).await.is_err() {
            return Err(JobError::ShutDown);
        }

        self.await_reply(id, rx).await
    }

    /// Resize `image` and persist the thumbnail. Skips the fetch stage.
    pub async fn submit_bytes(&self, image: impl Into<Bytes>) -> JobOutcome {
        let id = self.next_id();
        let image = image.into();
        tracing::debug!(job = id, bytes = image.len(), "Submitting upload");

        let (reply, rx) = reply_channel();
        if self.transform_tx.send(TransformJob { id, image, reply }).await.is_err() {
            return Err(JobError::ShutDown);
        }

        self.await_reply(id, rx).await
    }

    /// Wait for the reply or the job timeout, whichever comes first.
    ///
    /// On timeout the receiver is dropped here, which turns the worker's
    /// eventual write into a no-op.
    async fn await_reply(&self, id: JobId, rx: ReplyReceiver) -> JobOutcome {
        self.metrics.add_job_submitted();

        let outcome = match tokio::time::timeout(self.job_timeout, rx.recv()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(job = id, "Timeout after {:?} waiting for job", self.job_timeout);
                self.metrics.add_job_timed_out();
                return Err(JobError::Timeout(self.job_timeout));
            }
        };

        match &outcome {
            Ok(()) => self.metrics.add_job_succeeded(),
            Err(_) => self.metrics.add_job_failed(),
        }
        outcome
    }

    /// Close every queue and wait for all workers to drain and exit.
    ///
    /// Callers must stop submitting first; submissions racing with shutdown
    /// fail with [`JobError::ShutDown`]. Calling this again is a no-op.
    pub async fn shutdown(&self) {
        let Some(workers) = self.workers.lock().await.take() else {
            tracing::debug!("Pipeline already shut down");
            return;
        };

        tracing::info!("Stopping pipeline workers...");

        self.fetch_tx.close();
        join_stage("fetch", workers.fetch).await;

        // No fetch worker is left to feed the transform queue
        self.transform_tx.close();
        join_stage("transform", workers.transform).await;

        self.persist_tx.close();
        join_stage("persist", workers.persist).await;

        tracing::info!("Pipeline stopped");
    }

    /// Shared metrics.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn next_id(&self) -> JobId {
        self.next_job_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl JobSubmitter for Pipeline {
    async fn submit_from_url(&self, url: String) -> JobOutcome {
        Pipeline::submit_from_url(self, url).await
    }

    async fn submit_bytes(&self, image: Bytes) -> JobOutcome {
        Pipeline::submit_bytes(self, image).await
    }
}

async fn join_stage(stage: &str, handles: Vec<JoinHandle<()>>) {
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!("{} worker terminated abnormally: {}", stage, e);
        }
    }
    tracing::info!("All {} workers stopped", stage);
}
