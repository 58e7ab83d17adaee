//! JobRegistry - job_type から executor を引く
//!
//! # 学習ポイント
//! - Type erasure パターン (TypedExecutor<J> → DynExecutor)
//! - HashMap<String, Arc<dyn DynExecutor>> による管理
//!
//! The registry is built once at startup and handed to queues and workers
//! explicitly. There is no process-wide instance.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::{DeliveryJob, Job, JobEnvelope, QueueExecutionContext};
use crate::queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("executor for job type '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Object-safe executor for a single job type.
#[async_trait]
trait DynExecutor: Send + Sync {
    async fn execute_dyn(
        &self,
        envelope: &JobEnvelope,
        ctx: &QueueExecutionContext,
    ) -> Result<(), QueueError>;
}

struct TypedExecutor<J: Job> {
    _marker: PhantomData<fn() -> J>,
}

#[async_trait]
impl<J: Job> DynExecutor for TypedExecutor<J> {
    async fn execute_dyn(
        &self,
        envelope: &JobEnvelope,
        ctx: &QueueExecutionContext,
    ) -> Result<(), QueueError> {
        let job: J = envelope.decode()?;
        job.execute(ctx).await.map_err(QueueError::JobFailed)
    }
}

#[derive(Default)]
pub struct JobRegistry {
    executors: HashMap<String, Arc<dyn DynExecutor>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every job type this crate defines.
    pub fn with_builtin_jobs() -> Self {
        let mut registry = Self::new();
        registry.insert::<DeliveryJob>();
        registry
    }

    pub fn register<J: Job>(&mut self) -> Result<(), RegistryError> {
        if self.contains(J::TYPE) {
            return Err(RegistryError::AlreadyRegistered(J::TYPE.to_string()));
        }
        self.insert::<J>();
        Ok(())
    }

    fn insert<J: Job>(&mut self) {
        self.executors.insert(
            J::TYPE.to_string(),
            Arc::new(TypedExecutor::<J> {
                _marker: PhantomData,
            }),
        );
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.executors.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Decode `envelope` and run the job it holds.
    pub async fn execute(
        &self,
        envelope: &JobEnvelope,
        ctx: &QueueExecutionContext,
    ) -> Result<(), QueueError> {
        let executor = self
            .executors
            .get(envelope.job_type())
            .cloned()
            .ok_or_else(|| QueueError::UnknownJobType(envelope.job_type().to_string()))?;

        executor.execute_dyn(envelope, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};

    static RUNS: AtomicU32 = AtomicU32::new(0);

    #[derive(Serialize, Deserialize)]
    struct Count {
        fail: bool,
    }

    #[async_trait]
    impl Job for Count {
        const TYPE: &'static str = "test.count.v1";

        async fn execute(&self, ctx: &QueueExecutionContext) -> Result<(), SendError> {
            RUNS.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ctx.queue, "test");
            if self.fail {
                return Err(SendError::InvalidMessage("boom".into()));
            }
            Ok(())
        }
    }

    fn ctx(envelope: &JobEnvelope) -> QueueExecutionContext {
        QueueExecutionContext::new(envelope.job_id(), 1, "test")
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = JobRegistry::new();
        registry.register::<Count>().unwrap();

        let result = registry.register::<Count>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(t)) if t == Count::TYPE));
    }

    #[test]
    fn builtin_registry_knows_delivery() {
        let registry = JobRegistry::with_builtin_jobs();
        assert_eq!(registry.registered_types(), vec![DeliveryJob::TYPE.to_string()]);
    }

    #[test]
    fn builtin_registry_rejects_a_second_delivery_executor() {
        let mut registry = JobRegistry::with_builtin_jobs();
        assert!(matches!(
            registry.register::<DeliveryJob>(),
            Err(RegistryError::AlreadyRegistered(t)) if t == DeliveryJob::TYPE
        ));
        assert_eq!(registry.registered_types().len(), 1);
    }

    #[tokio::test]
    async fn execute_runs_job_and_maps_failure() {
        let mut registry = JobRegistry::new();
        registry.register::<Count>().unwrap();
        let before = RUNS.load(Ordering::SeqCst);

        let ok = JobEnvelope::encode(&Count { fail: false }).unwrap();
        registry.execute(&ok, &ctx(&ok)).await.unwrap();

        let bad = JobEnvelope::encode(&Count { fail: true }).unwrap();
        let err = registry.execute(&bad, &ctx(&bad)).await.unwrap_err();

        assert!(matches!(err, QueueError::JobFailed(SendError::InvalidMessage(_))));
        assert_eq!(RUNS.load(Ordering::SeqCst) - before, 2);
    }

    #[tokio::test]
    async fn unknown_job_type_is_an_error() {
        let registry = JobRegistry::new();
        let envelope = JobEnvelope::encode(&Count { fail: false }).unwrap();

        let err = registry.execute(&envelope, &ctx(&envelope)).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownJobType(t) if t == "test.count.v1"));
    }
}
