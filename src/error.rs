//! Job error taxonomy.
//!
//! Every stage failure is terminal for its job and reaches the original caller
//! unchanged through the job's reply channel.

use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by an external collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome delivered to a job's originator.
pub type JobOutcome = Result<(), JobError>;

/// Errors a submitted job can end with.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("image is missing")]
    MissingImage,

    #[error("image size is too large: {size} bytes exceeds the limit of {limit} bytes")]
    ImageTooLarge { size: u64, limit: u64 },

    #[error("failed to fetch {url}: {source}")]
    FetchTransport {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to get {url}: status {status}")]
    FetchStatus { url: String, status: u16 },

    #[error("transform error: {source}")]
    Transform {
        #[source]
        source: BoxError,
    },

    #[error("can't generate file name after {attempts} attempts: {source}")]
    NameGeneration {
        attempts: usize,
        #[source]
        source: BoxError,
    },

    #[error("failed to write {name}: {source}")]
    PersistWrite {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    #[error("pipeline is shut down")]
    ShutDown,

    #[error("job was dropped before producing an outcome")]
    JobLost,
}

impl JobError {
    /// Whether the failure was caused by the submitted input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, JobError::MissingImage | JobError::ImageTooLarge { .. })
    }

    /// Stable tag for logs and API error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::MissingImage => "missing_image",
            JobError::ImageTooLarge { .. } => "image_too_large",
            JobError::FetchTransport { .. } => "fetch_transport",
            JobError::FetchStatus { .. } => "fetch_status",
            JobError::Transform { .. } => "transform",
            JobError::NameGeneration { .. } => "name_generation",
            JobError::PersistWrite { .. } => "persist_write",
            JobError::Timeout(_) => "timeout",
            JobError::ShutDown => "shut_down",
            JobError::JobLost => "job_lost",
        }
    }
}
