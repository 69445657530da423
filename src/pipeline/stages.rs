//! Pipeline stages and their worker pools.
//!
//! The pipeline is split into three stages connected by bounded queues:
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Fetch    │────▶│  Transform  │────▶│   Persist   │──▶ reply Ok
//! │    Stage    │     │    Stage    │     │    Stage    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                   │
//!    fetch queue      transform queue      persist queue
//! ```
//!
//! Each stage runs a fixed number of workers pulling from its own queue, so
//! the worker count is the bound on concurrent collaborator calls for that
//! stage. A worker handles one job at a time and ends it in exactly one way:
//! forward it to the next queue, or reply with an error. Only the persist
//! stage replies with success.
//!
//! Workers exit once their queue is closed and drained.

use crate::error::JobError;
use crate::io::{BlobStore, FetchClient};
use crate::pipeline::job::{FetchJob, JobId, PersistJob, ReplySender, TransformJob};
use crate::pipeline::Metrics;
use crate::transform::{ImageTransformer, TargetBox};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Attempts at generating a unique blob name before giving up.
pub const NAME_GENERATION_ATTEMPTS: usize = 5;

/// Logic applied by every worker of one stage.
#[async_trait]
pub trait Stage<J: Send + 'static>: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Process one job to completion (forward or reply).
    async fn handle(&self, job: J);
}

/// Spawn `count` workers draining `queue` with `stage`.
pub fn spawn_workers<J, S>(stage: Arc<S>, queue: Receiver<J>, count: usize) -> Vec<JoinHandle<()>>
where
    J: Send + 'static,
    S: Stage<J>,
{
    let mut handles = Vec::with_capacity(count);
    for worker_id in 0..count {
        let stage = stage.clone();
        let queue = queue.clone();

        handles.push(tokio::spawn(async move {
            while let Ok(job) = queue.recv().await {
                stage.handle(job).await;
            }
            tracing::debug!("{} worker {} exiting", stage.name(), worker_id);
        }));
    }

    tracing::info!("The count of running {} workers: {}", stage.name(), count);
    handles
}

/// Reply with an error, tolerating a caller that already gave up.
fn fail(stage: &str, id: JobId, reply: ReplySender, err: JobError, metrics: &Metrics) {
    tracing::warn!(job = id, kind = err.kind(), "{} stage failed: {}", stage, err);
    if !reply.send(Err(err)) {
        tracing::debug!(job = id, "Caller stopped waiting, dropping {} failure", stage);
        metrics.add_orphaned_reply();
    }
}

/// Downloads remote images.
pub struct FetchStage {
    client: Arc<dyn FetchClient>,
    max_image_size: u64,
    next: Sender<TransformJob>,
    metrics: Arc<Metrics>,
}

impl FetchStage {
    /// Create a fetch stage forwarding to the transform queue.
    pub fn new(
        client: Arc<dyn FetchClient>,
        max_image_size: u64,
        next: Sender<TransformJob>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            max_image_size,
            next,
            metrics,
        }
    }

    /// Size is checked twice: against the advertised length before the
    /// download, and against the real body after it.
    async fn fetch(&self, url: &str) -> Result<Bytes, JobError> {
        let advertised = self
            .client
            .head(url)
            .await
            .map_err(|e| JobError::FetchTransport {
                url: url.to_string(),
                source: e.into(),
            })?;

        if let Some(size) = advertised {
            if size > self.max_image_size {
                return Err(JobError::ImageTooLarge {
                    size,
                    limit: self.max_image_size,
                });
            }
        }

        let response = self.client.get(url).await.map_err(|e| JobError::FetchTransport {
            url: url.to_string(),
            source: e.into(),
        })?;

        if !response.is_success() {
            return Err(JobError::FetchStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        let size = response.body.len() as u64;
        if size > self.max_image_size {
            return Err(JobError::ImageTooLarge {
                size,
                limit: self.max_image_size,
            });
        }

        Ok(response.body)
    }
}

#[async_trait]
impl Stage<FetchJob> for FetchStage {
    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn handle(&self, job: FetchJob) {
        let start = Instant::now();
        let result = self.fetch(&job.url).await;
        self.metrics.add_fetch_time(start.elapsed());

        match result {
            Ok(image) => {
                tracing::debug!(job = job.id, bytes = image.len(), "Fetched {}", job.url);
                self.metrics.add_bytes_fetched(image.len() as u64);
                forward(self.name(), &self.next, job.into_transform(image), &self.metrics).await;
            }
            Err(err) => fail(self.name(), job.id, job.reply, err, &self.metrics),
        }
    }
}

/// Resizes images into thumbnails.
pub struct TransformStage {
    transformer: Arc<dyn ImageTransformer>,
    target: TargetBox,
    next: Sender<PersistJob>,
    metrics: Arc<Metrics>,
}

impl TransformStage {
    /// Create a transform stage forwarding to the persist queue.
    pub fn new(
        transformer: Arc<dyn ImageTransformer>,
        target: TargetBox,
        next: Sender<PersistJob>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transformer,
            target,
            next,
            metrics,
        }
    }

    async fn transform(&self, image: Bytes) -> Result<(Bytes, String), JobError> {
        if image.is_empty() {
            return Err(JobError::MissingImage);
        }

        // CPU-bound decode/resize/encode runs off the async workers
        let transformer = self.transformer.clone();
        let target = self.target;
        let transformed = tokio::task::spawn_blocking(move || transformer.transform(&image, target))
            .await
            .map_err(|e| JobError::Transform {
                source: anyhow::anyhow!("transform task panicked: {}", e).into(),
            })?
            .map_err(|e| JobError::Transform { source: e.into() })?;

        Ok((transformed.image, transformed.extension))
    }
}

#[async_trait]
impl Stage<TransformJob> for TransformStage {
    fn name(&self) -> &'static str {
        "transform"
    }

    async fn handle(&self, mut job: TransformJob) {
        let image = std::mem::take(&mut job.image);

        let start = Instant::now();
        let result = self.transform(image).await;
        self.metrics.add_transform_time(start.elapsed());

        match result {
            Ok((thumbnail, extension)) => {
                tracing::debug!(job = job.id, bytes = thumbnail.len(), "Transformed to {}", extension);
                forward(self.name(), &self.next, job.into_persist(thumbnail, extension), &self.metrics).await;
            }
            Err(err) => fail(self.name(), job.id, job.reply, err, &self.metrics),
        }
    }
}

/// Writes thumbnails to the blob store. The only stage that replies success.
pub struct PersistStage {
    store: Arc<dyn BlobStore>,
    metrics: Arc<Metrics>,
}

impl PersistStage {
    /// Create the terminal persist stage.
    pub fn new(store: Arc<dyn BlobStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Retries only the local name generator, never the write.
    fn generate_name(&self) -> Result<String, JobError> {
        let mut last_err = None;
        for attempt in 1..=NAME_GENERATION_ATTEMPTS {
            match self.store.new_unique_name() {
                Ok(name) => return Ok(name),
                Err(e) => {
                    tracing::debug!("Name generation attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                }
            }
        }

        let source = last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made"));
        Err(JobError::NameGeneration {
            attempts: NAME_GENERATION_ATTEMPTS,
            source: source.into(),
        })
    }

    async fn persist(&self, image: Bytes, extension: &str) -> Result<String, JobError> {
        let name = format!("{}{}", self.generate_name()?, extension);
        let size = image.len() as u64;

        self.store
            .write(&name, image)
            .await
            .map_err(|e| JobError::PersistWrite {
                name: name.clone(),
                source: e.into(),
            })?;

        self.metrics.add_bytes_written(size);
        Ok(name)
    }
}

#[async_trait]
impl Stage<PersistJob> for PersistStage {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn handle(&self, mut job: PersistJob) {
        if job.reply.is_abandoned() {
            tracing::debug!(job = job.id, "Caller already timed out, persisting anyway");
        }
        let image = std::mem::take(&mut job.image);

        let start = Instant::now();
        let result = self.persist(image, &job.extension).await;
        self.metrics.add_persist_time(start.elapsed());

        match result {
            Ok(name) => {
                tracing::debug!(job = job.id, "Saved thumbnail {}", name);
                if !job.reply.send(Ok(())) {
                    // The job outlived its caller; the blob stays behind
                    tracing::warn!(job = job.id, "Thumbnail {} persisted after its caller timed out", name);
                    self.metrics.add_orphaned_reply();
                    self.metrics.add_orphaned_blob();
                }
            }
            Err(err) => fail(self.name(), job.id, job.reply, err, &self.metrics),
        }
    }
}

/// Push a job onto the next stage's queue, waiting while it is full.
///
/// The queue is only closed once every upstream worker has exited, so a
/// closed queue here means the pipeline was torn down abnormally; the job is
/// failed rather than dropped.
async fn forward<J>(stage: &str, next: &Sender<J>, job: J, metrics: &Metrics)
where
    J: Send + Into<(JobId, ReplySender)>,
{
    if let Err(err) = next.send(job).await {
        let (id, reply) = err.into_inner().into();
        fail(stage, id, reply, JobError::ShutDown, metrics);
    }
}

impl From<TransformJob> for (JobId, ReplySender) {
    fn from(job: TransformJob) -> Self {
        (job.id, job.reply)
    }
}

impl From<PersistJob> for (JobId, ReplySender) {
    fn from(job: PersistJob) -> Self {
        (job.id, job.reply)
    }
}
