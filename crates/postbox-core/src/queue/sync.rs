//! Inline queue: jobs run in the caller's task.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{JobState, Queue, QueueError};
use crate::domain::JobId;
use crate::job::{JobEnvelope, JobRegistry, QueueExecutionContext};
use crate::observability::QueueCounts;

/// Outcome of draining an inline queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct SyncState {
    /// Serialized envelopes waiting for `run()`.
    pending: VecDeque<Vec<u8>>,
    counts: QueueCounts,
}

/// Queue that executes jobs without workers.
///
/// With `handle = true` every push runs its job before returning, so the
/// caller sees the job's own failure as [`QueueError::JobFailed`]. With
/// `handle = false` pushes only store the job and [`SyncQueue::run`] executes
/// whatever is pending, oldest first.
///
/// Either way the job is serialized on push and deserialized before it runs,
/// the same as with any out-of-process queue. Each job gets exactly one
/// attempt; there is no retry.
pub struct SyncQueue {
    registry: Arc<JobRegistry>,
    handle: bool,
    state: Mutex<SyncState>,
}

impl SyncQueue {
    pub fn new(registry: Arc<JobRegistry>, handle: bool) -> Self {
        Self {
            registry,
            handle,
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn handles_on_push(&self) -> bool {
        self.handle
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Execute the oldest pending job. `None` when nothing is pending.
    pub async fn run_next(&self) -> Option<Result<JobId, QueueError>> {
        let bytes = self.state.lock().await.pending.pop_front()?;
        Some(self.execute(&bytes).await)
    }

    /// Execute every pending job in push order, including jobs pushed while
    /// running. Failures are logged, counted as dead and reported in the
    /// summary.
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        while let Some(result) = self.run_next().await {
            summary.executed += 1;
            if let Err(e) = result {
                summary.failed += 1;
                tracing::warn!(error = %e, "pending job failed");
            }
        }
        summary
    }

    async fn execute(&self, bytes: &[u8]) -> Result<JobId, QueueError> {
        let envelope = match JobEnvelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.state.lock().await.counts.record(JobState::Dead);
                return Err(e);
            }
        };
        let job_id = envelope.job_id();
        let ctx = QueueExecutionContext::new(job_id, 1, self.name());

        self.state.lock().await.counts.running += 1;
        let result = self.registry.execute(&envelope, &ctx).await;

        let mut state = self.state.lock().await;
        state.counts.running -= 1;
        match result {
            Ok(()) => {
                state.counts.record(JobState::Succeeded);
                Ok(job_id)
            }
            Err(e) => {
                state.counts.record(JobState::Dead);
                tracing::warn!(%job_id, error = %e, kind = ?e.kind(), "inline job failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Queue for SyncQueue {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn push(&self, envelope: JobEnvelope) -> Result<JobId, QueueError> {
        let job_id = envelope.job_id();
        let bytes = envelope.to_bytes()?;

        if self.handle {
            return self.execute(&bytes).await;
        }

        self.state.lock().await.pending.push_back(bytes);
        tracing::debug!(%job_id, queue = self.name(), "job stored until run()");
        Ok(job_id)
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueCounts {
            queued: state.pending.len(),
            ..state.counts
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;
    use crate::job::Job;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Record {
        value: u32,
    }

    #[async_trait]
    impl Job for Record {
        const TYPE: &'static str = "test.record.v1";

        async fn execute(&self, ctx: &QueueExecutionContext) -> Result<(), SendError> {
            assert_eq!(ctx.queue, "sync");
            assert_eq!(ctx.attempt, 1);
            if self.value == 0 {
                return Err(SendError::InvalidMessage("zero".into()));
            }
            Ok(())
        }
    }

    fn queue(handle: bool) -> SyncQueue {
        let mut registry = JobRegistry::new();
        registry.register::<Record>().unwrap();
        SyncQueue::new(Arc::new(registry), handle)
    }

    fn envelope(value: u32) -> JobEnvelope {
        JobEnvelope::encode(&Record { value }).unwrap()
    }

    #[tokio::test]
    async fn handle_executes_during_push() {
        let queue = queue(true);
        let envelope = envelope(1);
        let expected = envelope.job_id();

        let job_id = queue.push(envelope).await.unwrap();

        assert_eq!(job_id, expected);
        let counts = queue.counts_by_state().await.unwrap();
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.queued, 0);
    }

    #[tokio::test]
    async fn handle_surfaces_job_failure() {
        let queue = queue(true);

        let err = queue.push(envelope(0)).await.unwrap_err();

        assert!(matches!(err, QueueError::JobFailed(SendError::InvalidMessage(_))));
        assert_eq!(queue.counts_by_state().await.unwrap().dead, 1);
    }

    #[tokio::test]
    async fn without_handle_push_only_stores() {
        let queue = queue(false);
        queue.push(envelope(10)).await.unwrap();
        queue.push(envelope(0)).await.unwrap();

        let counts = queue.counts_by_state().await.unwrap();
        assert_eq!(counts.queued, 2);
        assert_eq!(counts.succeeded, 0);

        assert_eq!(
            queue.run().await,
            RunSummary {
                executed: 2,
                failed: 1
            }
        );

        let counts = queue.counts_by_state().await.unwrap();
        assert_eq!(counts.queued, 0);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.dead, 1);
        assert_eq!(queue.run().await, RunSummary::default());
    }

    #[tokio::test]
    async fn run_next_goes_oldest_first() {
        let queue = queue(false);
        let first = queue.push(envelope(100)).await.unwrap();
        let second = queue.push(envelope(100)).await.unwrap();

        assert_eq!(queue.run_next().await.unwrap().unwrap(), first);
        assert_eq!(queue.run_next().await.unwrap().unwrap(), second);
        assert!(queue.run_next().await.is_none());
    }

    #[tokio::test]
    async fn unknown_job_type_fails_the_push() {
        let queue = SyncQueue::new(Arc::new(JobRegistry::new()), true);

        let err = queue.push(envelope(1)).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownJobType(_)));
    }
}
