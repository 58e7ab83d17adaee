//! Job state machine for the queue.

use serde::{Deserialize, Serialize};

/// Job state.
///
/// State transitions:
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> RetryScheduled -> Queued (loop until max_attempts)
/// - Queued -> Running -> Dead (attempts exhausted or permanent error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to run immediately.
    Queued,

    /// Currently being executed by a worker.
    Running,

    /// Successfully completed.
    Succeeded,

    /// Waiting for retry (delayed due to backoff).
    RetryScheduled,

    /// Failed permanently.
    Dead,
}

impl JobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Dead)
    }

    /// Is this job runnable (eligible for lease)?
    pub fn is_runnable(self) -> bool {
        matches!(self, JobState::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(JobState::Queued, false, true)]
    #[case(JobState::Running, false, false)]
    #[case(JobState::RetryScheduled, false, false)]
    #[case(JobState::Succeeded, true, false)]
    #[case(JobState::Dead, true, false)]
    fn classification(#[case] state: JobState, #[case] terminal: bool, #[case] runnable: bool) {
        assert_eq!(state.is_terminal(), terminal);
        assert_eq!(state.is_runnable(), runnable);
    }
}
