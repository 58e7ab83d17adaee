use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::job::{JobRegistry, QueueExecutionContext};
use crate::queue::LeaseQueue;

/// Worker group handle.
/// - `request_shutdown()` でワーカー全体が新しい lease を取らなくなる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, queue: Arc<dyn LeaseQueue>, registry: Arc<JobRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let reg = Arc::clone(&registry);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, q, reg, &mut rx).await;
            });
            joins.push(join);
        }

        tracing::info!(workers = n, queue = queue.name(), "workers started");
        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// In-flight jobs run to completion; workers just stop taking new leases.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn LeaseQueue>,
    registry: Arc<JobRegistry>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        // lease は「待つ」可能性があるので select で shutdown と競合させる
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender dropped: nobody can ask us to stop anymore
                    break;
                }
                continue;
            }
            lease = queue.lease() => lease,
        };

        // queue closed
        let Some(lease) = lease else {
            break;
        };

        let envelope = lease.envelope().clone();
        let ctx = QueueExecutionContext::new(envelope.job_id(), lease.attempt(), queue.name());

        match registry.execute(&envelope, &ctx).await {
            Ok(()) => {
                if let Err(e) = lease.ack().await {
                    tracing::error!(worker_id, job_id = %ctx.job_id, error = %e, "ack failed");
                }
            }
            Err(err) => {
                // retry/dead の判断は queue 側
                if let Err(e) = lease.fail(err.kind(), err.to_string()).await {
                    tracing::error!(worker_id, job_id = %ctx.job_id, error = %e, "fail report failed");
                }
            }
        }
    }

    tracing::debug!(worker_id, "worker stopped");
}
