//! App - 設定からの組み立て
//!
//! Everything is wired explicitly from a [`PostboxConfig`]: the job registry,
//! the queue, the mailer and (for worker-driven queues) a [`WorkerGroup`].
//! Nothing is looked up from global state.

mod builder;

pub use builder::{AppBuilder, BuildError};

use std::sync::Arc;
use std::time::Duration;

use crate::config::PostboxConfig;
use crate::job::JobRegistry;
use crate::mailer::DeferredMailer;
use crate::observability::QueueCounts;
use crate::queue::{
    FileQueue, InMemoryQueue, LeaseQueue, Queue, QueueError, RunSummary, SyncQueue,
};
use crate::worker::WorkerGroup;

/// The configured queue, keeping its concrete type for queue-specific calls.
#[derive(Clone)]
pub enum QueueHandle {
    Sync(Arc<SyncQueue>),
    Memory(Arc<InMemoryQueue>),
    File(Arc<FileQueue>),
}

impl QueueHandle {
    pub fn name(&self) -> &'static str {
        self.as_queue().name()
    }

    pub fn as_queue(&self) -> Arc<dyn Queue> {
        match self {
            QueueHandle::Sync(q) => q.clone(),
            QueueHandle::Memory(q) => q.clone(),
            QueueHandle::File(q) => q.clone(),
        }
    }

    /// `None` for the inline queue, which has no workers.
    pub fn as_lease_queue(&self) -> Option<Arc<dyn LeaseQueue>> {
        match self {
            QueueHandle::Sync(_) => None,
            QueueHandle::Memory(q) => Some(q.clone()),
            QueueHandle::File(q) => Some(q.clone()),
        }
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        self.as_queue().counts_by_state().await
    }
}

pub struct App {
    config: PostboxConfig,
    registry: Arc<JobRegistry>,
    queue: QueueHandle,
    mailer: DeferredMailer,
    worker_count: usize,
    workers: Option<WorkerGroup>,
}

impl App {
    /// Build with the built-in jobs and start workers where the queue has them.
    pub async fn from_config(config: PostboxConfig) -> Result<Self, BuildError> {
        AppBuilder::new(config).build().await
    }

    pub fn config(&self) -> &PostboxConfig {
        &self.config
    }

    pub fn mailer(&self) -> &DeferredMailer {
        &self.mailer
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn workers_running(&self) -> bool {
        self.workers.is_some()
    }

    /// Start the configured number of workers. No-op for the inline queue or
    /// when they are already running.
    pub fn start_workers(&mut self) {
        if self.workers.is_some() {
            return;
        }
        if let Some(queue) = self.queue.as_lease_queue() {
            self.workers = Some(WorkerGroup::spawn(
                self.worker_count,
                queue,
                Arc::clone(&self.registry),
            ));
        }
    }

    /// Execute jobs stored by an inline queue with `handle = false`.
    /// Other queues have nothing to run here.
    pub async fn run_pending(&self) -> RunSummary {
        match &self.queue {
            QueueHandle::Sync(q) => q.run().await,
            _ => RunSummary::default(),
        }
    }

    /// Wait until the queue holds no queued, running or scheduled jobs.
    pub async fn wait_idle(&self, poll: Duration) -> Result<QueueCounts, QueueError> {
        loop {
            let counts = self.queue.counts().await?;
            if counts.is_idle() {
                return Ok(counts);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stop workers after their in-flight jobs and close the queue.
    pub async fn shutdown(self) {
        if let Some(queue) = self.queue.as_lease_queue() {
            queue.close();
        }
        if let Some(workers) = self.workers {
            workers.shutdown_and_join().await;
        }
        tracing::info!(queue = self.queue.name(), "postbox stopped");
    }
}
