//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for the pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Jobs accepted onto a stage queue
    pub jobs_submitted: AtomicU64,

    /// Jobs whose caller observed success
    pub jobs_succeeded: AtomicU64,

    /// Jobs whose caller observed a failure
    pub jobs_failed: AtomicU64,

    /// Jobs whose caller gave up waiting
    pub jobs_timed_out: AtomicU64,

    /// Outcomes written after the caller stopped listening
    pub orphaned_replies: AtomicU64,

    /// Thumbnails persisted for a caller that had already timed out
    pub orphaned_blobs: AtomicU64,

    /// Source bytes downloaded by the fetch stage
    pub bytes_fetched: AtomicU64,

    /// Thumbnail bytes written by the persist stage
    pub bytes_written: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage busy time (in microseconds, summed across workers)
    /// Time spent fetching
    pub fetch_us: AtomicU64,

    /// Time spent transforming
    pub transform_us: AtomicU64,

    /// Time spent persisting
    pub persist_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record a job accepted onto a stage queue.
    pub fn add_job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job whose caller observed success.
    pub fn add_job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job whose caller observed a failure.
    pub fn add_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caller that gave up waiting.
    pub fn add_job_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reply written to an abandoned channel.
    pub fn add_orphaned_reply(&self) {
        self.orphaned_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a thumbnail nobody waited for.
    pub fn add_orphaned_blob(&self) {
        self.orphaned_blobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record downloaded source bytes.
    pub fn add_bytes_fetched(&self, bytes: u64) {
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record persisted thumbnail bytes.
    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record time spent in the fetch stage.
    pub fn add_fetch_time(&self, duration: Duration) {
        self.fetch_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent in the transform stage.
    pub fn add_transform_time(&self, duration: Duration) {
        self.transform_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent in the persist stage.
    pub fn add_persist_time(&self, duration: Duration) {
        self.persist_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Successful jobs per second.
    pub fn jobs_per_second(&self) -> f64 {
        let jobs = self.jobs_succeeded.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            jobs as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            orphaned_replies: self.orphaned_replies.load(Ordering::Relaxed),
            orphaned_blobs: self.orphaned_blobs.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            jobs_per_second: self.jobs_per_second(),
            fetch_secs: self.fetch_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            transform_secs: self.transform_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            persist_secs: self.persist_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub orphaned_replies: u64,
    pub orphaned_blobs: u64,
    pub bytes_fetched: u64,
    pub bytes_written: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub jobs_per_second: f64,
    /// Total time spent fetching (seconds, summed across workers)
    pub fetch_secs: f64,
    /// Total time spent transforming (seconds, summed across workers)
    pub transform_secs: f64,
    /// Total time spent persisting (seconds, summed across workers)
    pub persist_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total_stage_time = self.fetch_secs + self.transform_secs + self.persist_secs;
        let (fetch_pct, transform_pct, persist_pct) = if total_stage_time > 0.0 {
            (
                self.fetch_secs / total_stage_time * 100.0,
                self.transform_secs / total_stage_time * 100.0,
                self.persist_secs / total_stage_time * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Jobs: {} submitted, {} succeeded, {} failed, {} timed out | \
             Orphaned: {} replies, {} blobs | \
             Fetched: {:.1} MB | Written: {:.1} MB | Rate: {:.1} jobs/s | Elapsed: {:.1}s | \
             Time: fetch {:.0}% | transform {:.0}% | persist {:.0}%",
            self.jobs_submitted,
            self.jobs_succeeded,
            self.jobs_failed,
            self.jobs_timed_out,
            self.orphaned_replies,
            self.orphaned_blobs,
            self.bytes_fetched as f64 / (1024.0 * 1024.0),
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.jobs_per_second,
            self.elapsed.as_secs_f64(),
            fetch_pct,
            transform_pct,
            persist_pct,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Log a snapshot every interval until `shutdown` fires or closes.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("{}", self.metrics.snapshot());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }
}
