//! Bounded multi-stage job pipeline.

pub mod job;
mod metrics;
mod orchestrator;
pub mod stages;


pub use job::{reply_channel, FetchJob, JobId, PersistJob, ReplyReceiver, ReplySender, TransformJob};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use orchestrator::{Collaborators, JobSubmitter, Pipeline, PipelineConfig};
