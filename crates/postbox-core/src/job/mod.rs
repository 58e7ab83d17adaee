//! Jobs: serializable units of work executed by a queue.
//!
//! A job is plain data plus an `execute` step. Queues only ever see the
//! [`JobEnvelope`] form; the [`JobRegistry`] turns an envelope back into a
//! typed job when it is time to run it.

mod delivery;
mod envelope;
mod registry;

pub use delivery::DeliveryJob;
pub use envelope::JobEnvelope;
pub use registry::{JobRegistry, RegistryError};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::JobId;
use crate::error::SendError;

/// Default number of execution attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job は job_type と型を対応付ける
///
/// # Trait Bounds
/// - `Serialize + DeserializeOwned`: queues store jobs as JSON
/// - `Send + Sync + 'static`: executed on worker tasks
///
/// # 命名規約
/// `{namespace}.{action}.v{major}` (例: `postbox.deliver.v1`)
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    fn max_attempts() -> u32 {
        DEFAULT_MAX_ATTEMPTS
    }

    async fn execute(&self, ctx: &QueueExecutionContext) -> Result<(), SendError>;
}

/// Diagnostics handed to a job on every execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueExecutionContext {
    pub job_id: JobId,
    /// 1-indexed.
    pub attempt: u32,
    /// Name of the queue running the job (`sync`, `memory`, `file`, `passthrough`).
    pub queue: String,
}

impl QueueExecutionContext {
    pub fn new(job_id: JobId, attempt: u32, queue: impl Into<String>) -> Self {
        Self {
            job_id,
            attempt,
            queue: queue.into(),
        }
    }
}
