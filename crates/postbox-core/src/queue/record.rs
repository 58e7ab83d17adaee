//! Job record: metadata + envelope.

use std::time::Instant;

use super::JobState;
use crate::job::JobEnvelope;

/// Metadata + envelope for a job in the queue.
///
/// Design:
/// - This is the "single source of truth" for job state.
/// - Queue structures (ready/scheduled) hold JobId only.
/// - All state transitions happen here.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub envelope: JobEnvelope,
    pub state: JobState,

    /// Number of times this job has been executed (including current attempt if Running).
    pub attempts: u32,

    /// Maximum allowed attempts, taken from the envelope.
    pub max_attempts: u32,

    /// Last error message (if any).
    pub last_error: Option<String>,

    /// When to retry next (for RetryScheduled state).
    pub next_run_at: Option<Instant>,

    pub created_at: Instant,
    pub updated_at: Instant,
}

impl JobRecord {
    pub fn new(envelope: JobEnvelope) -> Self {
        let now = Instant::now();
        Self {
            max_attempts: envelope.max_attempts(),
            envelope,
            state: JobState::Queued,
            attempts: 0,
            last_error: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark as running (increment attempts).
    pub fn start_attempt(&mut self) {
        self.state = JobState::Running;
        self.attempts += 1;
        self.updated_at = Instant::now();
    }

    pub fn mark_dead(&mut self, error: String) {
        self.state = JobState::Dead;
        self.last_error = Some(error);
        self.updated_at = Instant::now();
    }

    /// Schedule retry with backoff.
    pub fn schedule_retry(&mut self, next_run_at: Instant, error: String) {
        self.state = JobState::RetryScheduled;
        self.next_run_at = Some(next_run_at);
        self.last_error = Some(error);
        self.updated_at = Instant::now();
    }

    /// Move from RetryScheduled back to Queued.
    pub fn requeue(&mut self) {
        self.state = JobState::Queued;
        self.next_run_at = None;
        self.updated_at = Instant::now();
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{DeliveryJob, Job};

    fn envelope() -> JobEnvelope {
        let message = crate::domain::Message::builder()
            .from("a@b.local")
            .to("c@d.local")
            .build()
            .unwrap();
        JobEnvelope::encode(&DeliveryJob::new(
            crate::transport::TransportConfig::dsn("null://"),
            message,
        ))
        .unwrap()
    }

    #[test]
    fn budget_comes_from_the_envelope() {
        let record = JobRecord::new(envelope());
        assert_eq!(record.max_attempts, DeliveryJob::max_attempts());
        assert_eq!(record.state, JobState::Queued);
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn retry_then_requeue_clears_schedule() {
        let mut record = JobRecord::new(envelope());
        record.start_attempt();
        record.schedule_retry(Instant::now(), "421 busy".into());
        assert_eq!(record.state, JobState::RetryScheduled);

        record.requeue();
        assert_eq!(record.state, JobState::Queued);
        assert!(record.next_run_at.is_none());
        assert_eq!(record.last_error.as_deref(), Some("421 busy"));
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let mut record = JobRecord::new(envelope().with_max_attempts(2));
        record.start_attempt();
        assert!(!record.attempts_exhausted());
        record.start_attempt();
        assert!(record.attempts_exhausted());
    }
}
