//! Job envelopes and the reply channel.
//!
//! A job is created by a caller together with a [`reply_channel`]. The
//! [`ReplySender`] half travels with the job from stage to stage inside the
//! envelopes below and is never replaced; whichever worker terminates the job
//! consumes it exactly once. The caller keeps the [`ReplyReceiver`] and may
//! drop it on timeout, after which a late write is a silent no-op.

use crate::error::{JobError, JobOutcome};
use bytes::Bytes;
use tokio::sync::oneshot;

/// Identifier used to correlate log lines of one job.
pub type JobId = u64;

/// Create a single-use, single-slot reply channel.
pub fn reply_channel() -> (ReplySender, ReplyReceiver) {
    let (tx, rx) = oneshot::channel();
    (ReplySender { tx }, ReplyReceiver { rx })
}

/// Writing half of a reply channel, owned by whichever worker holds the job.
#[derive(Debug)]
pub struct ReplySender {
    tx: oneshot::Sender<JobOutcome>,
}

impl ReplySender {
    /// Deliver the job's outcome.
    ///
    /// Never blocks. Returns `false` when the caller has stopped listening
    /// (timed out), in which case the outcome is dropped.
    pub fn send(self, outcome: JobOutcome) -> bool {
        self.tx.send(outcome).is_ok()
    }

    /// Whether the caller has stopped listening.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reading half of a reply channel, owned by the caller.
#[derive(Debug)]
pub struct ReplyReceiver {
    rx: oneshot::Receiver<JobOutcome>,
}

impl ReplyReceiver {
    /// Wait for the outcome.
    ///
    /// A sender dropped without a value (a worker died mid-job) surfaces as
    /// [`JobError::JobLost`].
    pub async fn recv(self) -> JobOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(JobError::JobLost),
        }
    }
}

/// Envelope for the fetch stage.
#[derive(Debug)]
pub struct FetchJob {
    pub id: JobId,
    pub url: String,
    pub reply: ReplySender,
}

impl FetchJob {
    /// Hand the downloaded image to the transform stage, keeping the reply channel.
    pub fn into_transform(self, image: Bytes) -> TransformJob {
        TransformJob {
            id: self.id,
            image,
            reply: self.reply,
        }
    }
}

/// Envelope for the transform stage.
#[derive(Debug)]
pub struct TransformJob {
    pub id: JobId,
    pub image: Bytes,
    pub reply: ReplySender,
}

impl TransformJob {
    /// Hand the thumbnail to the persist stage, keeping the reply channel.
    pub fn into_persist(self, image: Bytes, extension: String) -> PersistJob {
        PersistJob {
            id: self.id,
            image,
            extension,
            reply: self.reply,
        }
    }
}

/// Envelope for the persist stage.
#[derive(Debug)]
pub struct PersistJob {
    pub id: JobId,
    pub image: Bytes,
    /// Extension with leading dot, as reported by the transformer
    pub extension: String,
    pub reply: ReplySender,
}
