//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 設定は build() の前に検証済み
//! - job 型の二重登録は register() でエラー

use std::sync::Arc;
use std::time::Duration;

use super::{App, QueueHandle};
use crate::config::{ConfigError, PostboxConfig, QueueConfig};
use crate::job::{Job, JobRegistry, RegistryError};
use crate::mailer::DeferredMailer;
use crate::queue::{FileQueue, InMemoryQueue, QueueError, SyncQueue};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to open queue: {0}")]
    Queue(#[from] QueueError),
}

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(config)
///     .register::<MyJob>()?
///     .without_workers()
///     .build()
///     .await?;
/// ```
pub struct AppBuilder {
    config: PostboxConfig,
    registry: JobRegistry,
    start_workers: bool,
}

impl AppBuilder {
    /// Starts from a registry holding the built-in delivery job.
    pub fn new(config: PostboxConfig) -> Self {
        Self {
            config,
            registry: JobRegistry::with_builtin_jobs(),
            start_workers: true,
        }
    }

    /// Register an additional job type.
    pub fn register<J: Job>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<J>()?;
        Ok(self)
    }

    /// Do not spawn workers in `build()`; jobs are only pushed. Workers can
    /// still be started later with [`App::start_workers`].
    pub fn without_workers(mut self) -> Self {
        self.start_workers = false;
        self
    }

    pub async fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;
        let registry = Arc::new(self.registry);

        let (queue, worker_count) = match &self.config.queue {
            QueueConfig::Sync { handle } => (
                QueueHandle::Sync(Arc::new(SyncQueue::new(Arc::clone(&registry), *handle))),
                0,
            ),
            QueueConfig::Memory {
                workers,
                capacity,
                max_attempts,
                retry,
            } => {
                let mut queue = InMemoryQueue::new(retry.policy());
                if let Some(capacity) = capacity {
                    queue = queue.with_capacity(*capacity);
                }
                if let Some(max_attempts) = max_attempts {
                    queue = queue.with_max_attempts(*max_attempts);
                }
                (QueueHandle::Memory(Arc::new(queue)), *workers)
            }
            QueueConfig::File {
                path,
                workers,
                poll_interval_ms,
                lease_timeout_secs,
                max_attempts,
                retry,
            } => {
                let mut queue = FileQueue::open(path, retry.policy())
                    .await?
                    .with_poll_interval(Duration::from_millis(*poll_interval_ms))
                    .with_lease_timeout(Duration::from_secs(*lease_timeout_secs));
                if let Some(max_attempts) = max_attempts {
                    queue = queue.with_max_attempts(*max_attempts);
                }
                (QueueHandle::File(Arc::new(queue)), *workers)
            }
        };

        let mut mailer = DeferredMailer::new(queue.as_queue(), self.config.transport.clone())
            .with_mode(self.config.mailer.mode);
        if let Some(from) = &self.config.mailer.from {
            mailer = mailer.with_default_from(from.clone());
        }

        tracing::info!(
            queue = queue.name(),
            mode = ?self.config.mailer.mode,
            jobs = ?registry.registered_types(),
            "postbox configured"
        );

        let mut app = App {
            config: self.config,
            registry,
            queue,
            mailer,
            worker_count,
            workers: None,
        };
        if self.start_workers {
            app.start_workers();
        }
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;
    use crate::job::{DeliveryJob, QueueExecutionContext};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    fn config(queue: &str) -> PostboxConfig {
        PostboxConfig::from_toml_str(&format!(
            "[transport]\nkind = \"dsn\"\ndsn = \"null://\"\n[queue]\n{queue}"
        ))
        .unwrap()
    }

    #[derive(Serialize, Deserialize)]
    struct Extra;

    #[async_trait]
    impl Job for Extra {
        const TYPE: &'static str = "test.extra.v1";

        async fn execute(&self, _ctx: &QueueExecutionContext) -> Result<(), SendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sync_queue_has_no_workers() {
        let app = App::from_config(config("kind = \"sync\"")).await.unwrap();

        assert_eq!(app.queue().name(), "sync");
        assert!(!app.workers_running());
    }

    #[tokio::test]
    async fn memory_queue_starts_workers() {
        let app = App::from_config(config("kind = \"memory\"\nworkers = 2"))
            .await
            .unwrap();

        assert_eq!(app.queue().name(), "memory");
        assert!(app.workers_running());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn without_workers_only_pushes() {
        let app = AppBuilder::new(config("kind = \"memory\""))
            .without_workers()
            .build()
            .await
            .unwrap();

        assert!(!app.workers_running());
    }

    #[tokio::test]
    async fn extra_jobs_can_be_registered() {
        let app = AppBuilder::new(config("kind = \"sync\""))
            .register::<Extra>()
            .unwrap()
            .build()
            .await
            .unwrap();

        assert_eq!(
            app.registry().registered_types(),
            vec![DeliveryJob::TYPE.to_string(), Extra::TYPE.to_string()]
        );
    }

    #[test]
    fn builtin_jobs_cannot_be_registered_twice() {
        let result = AppBuilder::new(config("kind = \"sync\"")).register::<DeliveryJob>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }
}
