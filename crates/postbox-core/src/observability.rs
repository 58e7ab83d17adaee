//! Queue status views.

use serde::{Deserialize, Serialize};

use crate::queue::JobState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub retry_scheduled: usize,
    pub dead: usize,
}

impl QueueCounts {
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Queued => self.queued += 1,
            JobState::Running => self.running += 1,
            JobState::Succeeded => self.succeeded += 1,
            JobState::RetryScheduled => self.retry_scheduled += 1,
            JobState::Dead => self.dead += 1,
        }
    }

    /// Jobs that will still execute (or are executing).
    pub fn pending(&self) -> usize {
        self.queued + self.running + self.retry_scheduled
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}
