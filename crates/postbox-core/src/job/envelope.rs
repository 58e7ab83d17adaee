//! JobEnvelope - the stored form of a job.

use serde::{Deserialize, Serialize};

use super::Job;
use crate::domain::JobId;
use crate::queue::QueueError;

/// Plain-data form of a job as held by queues.
///
/// The payload is the job serialized as JSON; nothing in an envelope refers
/// to live objects, so it can be written to disk and executed by another
/// process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    job_id: JobId,
    job_type: String,
    payload: serde_json::Value,
    max_attempts: u32,
}

impl JobEnvelope {
    /// Encode a job under a freshly generated id.
    pub fn encode<J: Job>(job: &J) -> Result<Self, QueueError> {
        Ok(Self {
            job_id: JobId::generate(),
            job_type: J::TYPE.to_string(),
            payload: serde_json::to_value(job)?,
            max_attempts: J::max_attempts(),
        })
    }

    /// Decode the payload back into `J`, checking the job type first.
    pub fn decode<J: Job>(&self) -> Result<J, QueueError> {
        if self.job_type != J::TYPE {
            return Err(QueueError::TypeMismatch {
                expected: J::TYPE.to_string(),
                found: self.job_type.clone(),
            });
        }
        Ok(J::deserialize(&self.payload)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QueueError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Override the attempt budget (queue-level configuration).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}
