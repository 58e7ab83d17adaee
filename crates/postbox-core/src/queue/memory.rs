//! In-memory queue implementation.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{JobLease, JobRecord, JobState, LeaseQueue, Queue, QueueError, RetryPolicy};
use crate::domain::JobId;
use crate::error::ErrorKind;
use crate::job::JobEnvelope;
use crate::observability::QueueCounts;

/// Scheduled job entry for priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledJob {
    next_run_at: Instant,
    job_id: JobId,
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .next_run_at
            .cmp(&self.next_run_at)
            .then_with(|| other.job_id.cmp(&self.job_id))
    }
}

/// A job that will not run again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub job_id: JobId,
    pub job_type: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Dead letters kept for inspection unless overridden.
pub const DEFAULT_DEAD_LETTER_LIMIT: usize = 1000;

/// In-memory queue state.
struct InMemoryQueueState {
    /// Records of live jobs (single source of truth). Finished jobs are
    /// dropped and only counted.
    records: HashMap<JobId, JobRecord>,

    /// Ready queue (JobIds only).
    ready: VecDeque<JobId>,

    /// Scheduled queue (retry backoff).
    scheduled: BinaryHeap<ScheduledJob>,

    /// Most recent dead letters, oldest first.
    dead_letters: VecDeque<DeadLetter>,

    succeeded: usize,
    dead: usize,

    retry_policy: RetryPolicy,
}

impl InMemoryQueueState {
    fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            records: HashMap::new(),
            ready: VecDeque::new(),
            scheduled: BinaryHeap::new(),
            dead_letters: VecDeque::new(),
            succeeded: 0,
            dead: 0,
            retry_policy,
        }
    }

    /// Move jobs from scheduled to ready if their time has come.
    fn promote_scheduled_jobs(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_run_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.job_id)
                && record.state == JobState::RetryScheduled
            {
                record.requeue();
                self.ready.push_back(entry.job_id);
            }
        }
    }

    fn counts_by_state(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            succeeded: self.succeeded,
            dead: self.dead,
            ..QueueCounts::default()
        };
        for record in self.records.values() {
            counts.record(record.state);
        }
        counts
    }

    fn bury(&mut self, record: JobRecord, limit: usize) {
        self.dead += 1;
        self.dead_letters.push_back(DeadLetter {
            job_id: record.envelope.job_id(),
            job_type: record.envelope.job_type().to_string(),
            attempts: record.attempts,
            last_error: record.last_error,
        });
        while self.dead_letters.len() > limit {
            self.dead_letters.pop_front();
        }
    }
}

/// Process-local queue with retry backoff.
///
/// Jobs are handed to workers through [`LeaseQueue::lease`]. Failed jobs are
/// retried per [`RetryPolicy`] until their attempt budget runs out; permanent
/// errors are dead-lettered at once.
pub struct InMemoryQueue {
    state: Arc<Mutex<InMemoryQueueState>>,
    notify: Arc<Notify>,
    closed: AtomicBool,
    capacity: Option<usize>,
    max_attempts: Option<u32>,
    dead_letter_limit: usize,
}

impl InMemoryQueue {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryQueueState::new(retry_policy))),
            notify: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
            capacity: None,
            max_attempts: None,
            dead_letter_limit: DEFAULT_DEAD_LETTER_LIMIT,
        }
    }

    /// Reject pushes with [`QueueError::Full`] once `capacity` jobs are live.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Override the attempt budget carried by pushed envelopes.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Keep at most `limit` dead letters; older ones are discarded but still
    /// counted in [`QueueCounts::dead`].
    pub fn with_dead_letter_limit(mut self, limit: usize) -> Self {
        self.dead_letter_limit = limit;
        self
    }

    /// Snapshot of a live job's record. Finished jobs have none.
    pub async fn get(&self, job_id: JobId) -> Option<JobRecord> {
        let state = self.state.lock().await;
        state.records.get(&job_id).cloned()
    }

    /// Jobs that are queued, running or waiting for a retry.
    pub async fn live_jobs(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Retained dead letters, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        let state = self.state.lock().await;
        state.dead_letters.iter().cloned().collect()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, envelope: JobEnvelope) -> Result<JobId, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let envelope = match self.max_attempts {
            Some(n) => envelope.with_max_attempts(n),
            None => envelope,
        };
        let job_id = envelope.job_id();

        {
            let mut state = self.state.lock().await;
            if let Some(capacity) = self.capacity
                && state.records.len() >= capacity
            {
                return Err(QueueError::Full { capacity });
            }
            state.records.insert(job_id, JobRecord::new(envelope));
            state.ready.push_back(job_id);
        }

        tracing::debug!(%job_id, queue = self.name(), "job accepted");
        // Notify waiting workers
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock().await;
        Ok(state.counts_by_state())
    }
}

#[async_trait]
impl LeaseQueue for InMemoryQueue {
    async fn lease(&self) -> Option<Box<dyn JobLease>> {
        loop {
            // Register interest before inspecting state so a concurrent
            // push/close cannot slip between the check and the wait.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_scheduled_jobs();

                while let Some(job_id) = state.ready.pop_front() {
                    let Some(record) = state.records.get_mut(&job_id) else {
                        continue;
                    };
                    record.start_attempt();
                    let lease = InMemoryLease {
                        job_id,
                        envelope: record.envelope.clone(),
                        attempt: record.attempts,
                        queue: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                        dead_letter_limit: self.dead_letter_limit,
                    };
                    return Some(Box::new(lease));
                }

                // No ready jobs - check if we have scheduled ones
                state.scheduled.peek().map(|entry| entry.next_run_at)
            };

            // Wait for notification OR next scheduled job time
            if let Some(wake_time) = next_wake {
                tokio::select! {
                    _ = notified => {},
                    _ = tokio::time::sleep_until(wake_time.into()) => {},
                }
            } else {
                notified.await;
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Lease implementation for InMemoryQueue.
struct InMemoryLease {
    job_id: JobId,
    envelope: JobEnvelope,
    attempt: u32,
    queue: Arc<Mutex<InMemoryQueueState>>,
    notify: Arc<Notify>,
    dead_letter_limit: usize,
}

#[async_trait]
impl JobLease for InMemoryLease {
    fn envelope(&self) -> &JobEnvelope {
        &self.envelope
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let mut state = self.queue.lock().await;
        if state.records.remove(&self.job_id).is_some() {
            state.succeeded += 1;
        }
        Ok(())
    }

    async fn fail(self: Box<Self>, kind: ErrorKind, error: String) -> Result<(), QueueError> {
        let should_notify = {
            let mut state = self.queue.lock().await;
            let retry_policy = state.retry_policy.clone();

            let Some(record) = state.records.get_mut(&self.job_id) else {
                return Ok(());
            };

            if !kind.is_retryable() || record.attempts_exhausted() {
                tracing::warn!(
                    job_id = %self.job_id,
                    attempts = record.attempts,
                    max_attempts = record.max_attempts,
                    ?kind,
                    %error,
                    "job dead-lettered"
                );
                record.mark_dead(error);
                if let Some(record) = state.records.remove(&self.job_id) {
                    state.bury(record, self.dead_letter_limit);
                }
                false // Terminal state, no need to notify
            } else {
                // Schedule retry with backoff
                let delay = retry_policy.next_delay(record.attempts);
                let next_run_at = Instant::now() + delay;
                tracing::warn!(
                    job_id = %self.job_id,
                    attempts = record.attempts,
                    max_attempts = record.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "job failed, retry scheduled"
                );
                record.schedule_retry(next_run_at, error);
                state.scheduled.push(ScheduledJob {
                    next_run_at,
                    job_id: self.job_id,
                });
                true // Scheduled job needs notification
            }
        }; // Lock released here

        // Notify outside the lock
        if should_notify {
            self.notify.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::SendError;
    use crate::job::{Job, QueueExecutionContext};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Noop;

    #[async_trait]
    impl Job for Noop {
        const TYPE: &'static str = "test.noop.v1";

        async fn execute(&self, _ctx: &QueueExecutionContext) -> Result<(), SendError> {
            Ok(())
        }
    }

    fn envelope() -> JobEnvelope {
        JobEnvelope::encode(&Noop).unwrap()
    }

    async fn lease(queue: &InMemoryQueue) -> Box<dyn JobLease> {
        tokio::time::timeout(Duration::from_millis(500), queue.lease())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn push_and_counts() {
        let queue = InMemoryQueue::new(RetryPolicy::default());
        queue.push(envelope()).await.unwrap();

        let counts = queue.counts_by_state().await.unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.running, 0);
    }

    #[tokio::test]
    async fn lease_transitions_to_running() {
        let queue = InMemoryQueue::new(RetryPolicy::default());
        let job_id = queue.push(envelope()).await.unwrap();

        let lease = lease(&queue).await;
        assert_eq!(lease.envelope().job_id(), job_id);
        assert_eq!(lease.attempt(), 1);

        let counts = queue.counts_by_state().await.unwrap();
        assert_eq!(counts.queued, 0);
        assert_eq!(counts.running, 1);
    }

    #[tokio::test]
    async fn ack_marks_succeeded() {
        let queue = InMemoryQueue::new(RetryPolicy::default());
        queue.push(envelope()).await.unwrap();
        lease(&queue).await.ack().await.unwrap();

        let counts = queue.counts_by_state().await.unwrap();
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.running, 0);
    }

    #[tokio::test]
    async fn finished_jobs_do_not_accumulate() {
        let queue = InMemoryQueue::new(RetryPolicy::default());
        for _ in 0..200 {
            let job_id = queue.push(envelope()).await.unwrap();
            lease(&queue).await.ack().await.unwrap();
            assert!(queue.get(job_id).await.is_none());
        }

        assert_eq!(queue.live_jobs().await, 0);
        let counts = queue.counts_by_state().await.unwrap();
        assert_eq!(counts.succeeded, 200);
        assert!(counts.is_idle());
    }

    #[tokio::test]
    async fn dead_letters_are_bounded_but_counted() {
        let queue = InMemoryQueue::new(RetryPolicy::immediate()).with_dead_letter_limit(2);
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(queue.push(envelope()).await.unwrap());
            lease(&queue)
                .await
                .fail(ErrorKind::Permanent, format!("550 rejected {n}"))
                .await
                .unwrap();
        }

        let dead = queue.dead_letters().await;
        assert_eq!(
            dead.iter().map(|d| d.job_id).collect::<Vec<_>>(),
            ids[1..].to_vec()
        );
        assert_eq!(dead[1].last_error.as_deref(), Some("550 rejected 2"));
        assert_eq!(queue.counts_by_state().await.unwrap().dead, 3);
        assert_eq!(queue.live_jobs().await, 0);
    }

    #[tokio::test]
    async fn leases_in_fifo_order() {
        let queue = InMemoryQueue::new(RetryPolicy::default());
        let first = queue.push(envelope()).await.unwrap();
        let second = queue.push(envelope()).await.unwrap();

        assert_eq!(lease(&queue).await.envelope().job_id(), first);
        assert_eq!(lease(&queue).await.envelope().job_id(), second);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_budget_runs_out() {
        let queue = InMemoryQueue::new(RetryPolicy::immediate()).with_max_attempts(2);
        let job_id = queue.push(envelope()).await.unwrap();

        lease(&queue)
            .await
            .fail(ErrorKind::Transient, "421 busy".into())
            .await
            .unwrap();
        assert_eq!(queue.get(job_id).await.unwrap().state, JobState::RetryScheduled);

        let second = lease(&queue).await;
        assert_eq!(second.attempt(), 2);
        second
            .fail(ErrorKind::Transient, "421 still busy".into())
            .await
            .unwrap();

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job_id, job_id);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].last_error.as_deref(), Some("421 still busy"));
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let queue = InMemoryQueue::new(RetryPolicy::immediate());
        queue.push(envelope()).await.unwrap();

        lease(&queue)
            .await
            .fail(ErrorKind::Permanent, "550 no such user".into())
            .await
            .unwrap();

        let counts = queue.counts_by_state().await.unwrap();
        assert_eq!(counts.dead, 1);
        assert_eq!(counts.retry_scheduled, 0);
    }

    #[tokio::test]
    async fn retry_waits_for_backoff() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(80),
            ..RetryPolicy::default()
        };
        let queue = InMemoryQueue::new(policy);
        queue.push(envelope()).await.unwrap();

        let started = Instant::now();
        lease(&queue)
            .await
            .fail(ErrorKind::Transient, "timeout".into())
            .await
            .unwrap();
        let retried = lease(&queue).await;

        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(retried.attempt(), 2);
    }

    #[tokio::test]
    async fn capacity_limits_live_jobs() {
        let queue = InMemoryQueue::new(RetryPolicy::default()).with_capacity(1);
        queue.push(envelope()).await.unwrap();

        let err = queue.push(envelope()).await.unwrap_err();
        assert!(matches!(err, QueueError::Full { capacity: 1 }));

        lease(&queue).await.ack().await.unwrap();
        queue.push(envelope()).await.unwrap();
    }

    #[tokio::test]
    async fn close_wakes_waiting_workers_and_rejects_pushes() {
        let queue = Arc::new(InMemoryQueue::new(RetryPolicy::default()));
        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.lease().await.is_none() }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close();

        assert!(waiter.await.unwrap());
        assert!(matches!(
            queue.push(envelope()).await,
            Err(QueueError::Closed)
        ));
    }
}
