use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Job, QueueExecutionContext};
use crate::domain::Message;
use crate::error::SendError;
use crate::transport::TransportConfig;

/// Deliver one message through the transport described by `transport`.
///
/// Only plain data is stored: the live transport is rebuilt from its config
/// on every attempt. There is no deduplication token, so a job that fails
/// after the transport accepted the message may deliver it twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub transport: TransportConfig,
    pub message: Message,
}

impl DeliveryJob {
    pub fn new(transport: TransportConfig, message: Message) -> Self {
        Self { transport, message }
    }
}

#[async_trait]
impl Job for DeliveryJob {
    const TYPE: &'static str = "postbox.deliver.v1";

    async fn execute(&self, ctx: &QueueExecutionContext) -> Result<(), SendError> {
        let transport = self.transport.build()?;
        transport.send(&self.message).await?;

        tracing::info!(
            job_id = %ctx.job_id,
            message_id = %self.message.id(),
            queue = %ctx.queue,
            attempt = ctx.attempt,
            transport = transport.name(),
            "message delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;
    use crate::transport::TransportError;

    fn message() -> Message {
        Message::builder()
            .from("admin@email.local")
            .to("test@email.local")
            .subject("test email")
            .text("body: abc")
            .build()
            .unwrap()
    }

    fn ctx() -> QueueExecutionContext {
        QueueExecutionContext::new(JobId::generate(), 1, "test")
    }

    #[tokio::test]
    async fn writes_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let job = DeliveryJob::new(TransportConfig::file(dir.path()), message());

        job.execute(&ctx()).await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn null_dsn_accepts_everything() {
        let job = DeliveryJob::new(TransportConfig::dsn("null://"), message());
        job.execute(&ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn bad_config_is_a_transport_failure() {
        let job = DeliveryJob::new(TransportConfig::dsn("carrier-pigeon://coop"), message());

        let err = job.execute(&ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            SendError::TransportFailure(TransportError::Config(_))
        ));
    }

    #[test]
    fn survives_json_round_trip() {
        let job = DeliveryJob::new(TransportConfig::dsn("null://"), message());
        let json = serde_json::to_string(&job).unwrap();
        let restored: DeliveryJob = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, job);
    }
}
