//! Queue module: state management, retry logic, and the queue implementations.
//!
//! - [`SyncQueue`]: executes inline (or on an explicit `run()`)
//! - [`InMemoryQueue`]: workers + retry backoff, process-local
//! - [`FileQueue`]: spool directory, survives restarts

mod file;
mod memory;
mod record;
mod retry;
mod state;
mod sync;

pub use file::FileQueue;
pub use memory::{DeadLetter, InMemoryQueue};
pub use record::JobRecord;
pub use retry::RetryPolicy;
pub use state::JobState;
pub use sync::{RunSummary, SyncQueue};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::JobId;
use crate::error::{ErrorKind, SendError};
use crate::job::JobEnvelope;
use crate::observability::QueueCounts;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("queue is closed")]
    Closed,

    #[error("job codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no executor registered for job type '{0}'")]
    UnknownJobType(String),

    #[error("envelope holds job type '{found}', expected '{expected}'")]
    TypeMismatch { expected: String, found: String },

    /// The claim was recovered by another worker before this lease settled.
    #[error("lease on {0} expired before it was settled")]
    LeaseExpired(JobId),

    /// The job ran and failed. Only inline queues return this from `push`.
    #[error("job failed: {0}")]
    JobFailed(SendError),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::JobFailed(e) => e.kind(),
            QueueError::Codec(_)
            | QueueError::UnknownJobType(_)
            | QueueError::TypeMismatch { .. } => ErrorKind::Permanent,
            QueueError::Unavailable(_)
            | QueueError::Full { .. }
            | QueueError::Closed
            | QueueError::LeaseExpired(_)
            | QueueError::Io(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Producer side of a queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Short name used in logs and execution contexts.
    fn name(&self) -> &'static str;

    /// Accept a job. Returns the id it will run under.
    async fn push(&self, envelope: JobEnvelope) -> Result<JobId, QueueError>;

    async fn counts_by_state(&self) -> Result<QueueCounts, QueueError>;
}

/// A leased job for processing.
/// The worker owns this lease and must either `ack` or `fail`.
///
/// Design intent:
/// - Queue manages state transitions (Queued -> Running -> ...).
/// - Worker executes the job and reports the result.
#[async_trait]
pub trait JobLease: Send {
    fn envelope(&self) -> &JobEnvelope;

    /// 1-indexed attempt number of this execution.
    fn attempt(&self) -> u32;

    /// Mark success.
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Mark failure (queue decides retry/dead from `kind` and the attempt budget).
    async fn fail(self: Box<Self>, kind: ErrorKind, error: String) -> Result<(), QueueError>;
}

/// Consumer side of a queue, driven by a `WorkerGroup`.
#[async_trait]
pub trait LeaseQueue: Queue {
    /// Lease one ready job (waits until available, or returns None once closed).
    async fn lease(&self) -> Option<Box<dyn JobLease>>;

    /// Stop handing out leases and reject further pushes.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn job_failures_keep_the_send_error_kind() {
        let transient = QueueError::JobFailed(SendError::TransportFailure(TransportError::Io(
            std::io::Error::other("connection reset"),
        )));
        let permanent = QueueError::JobFailed(SendError::InvalidMessage("no recipients".into()));

        assert_eq!(transient.kind(), ErrorKind::Transient);
        assert_eq!(permanent.kind(), ErrorKind::Permanent);
        assert_eq!(QueueError::Closed.kind(), ErrorKind::Infrastructure);
        assert_eq!(
            QueueError::UnknownJobType("x".into()).kind(),
            ErrorKind::Permanent
        );
    }
}
