//! DeferredMailer - the mail-sending surface applications use.
//!
//! Sending never talks to a transport directly (unless the mailer is in
//! passthrough mode): it wraps the message in a [`DeliveryJob`] and pushes it.
//! Whether the job runs inline or later is decided by the queue alone, so the
//! same code path serves both.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{JobId, Message, MessageBuilder};
use crate::error::SendError;
use crate::job::{DeliveryJob, Job, JobEnvelope, QueueExecutionContext};
use crate::queue::{Queue, QueueError};
use crate::transport::TransportConfig;

/// How a mailer delivers. Fixed per instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Push a delivery job to the queue.
    #[default]
    Deferred,
    /// Run the delivery job in the caller's task; the queue is never touched.
    Passthrough,
}

pub struct DeferredMailer {
    queue: Arc<dyn Queue>,
    transport: TransportConfig,
    mode: DeliveryMode,
    default_from: Option<String>,
}

impl DeferredMailer {
    pub fn new(queue: Arc<dyn Queue>, transport: TransportConfig) -> Self {
        Self {
            queue,
            transport,
            mode: DeliveryMode::default(),
            default_from: None,
        }
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sender pre-filled by [`DeferredMailer::compose`].
    pub fn with_default_from(mut self, from: impl Into<String>) -> Self {
        self.default_from = Some(from.into());
        self
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// Start a new message.
    pub fn compose(&self) -> MessageBuilder {
        let builder = Message::builder();
        match &self.default_from {
            Some(from) => builder.from(from.clone()),
            None => builder,
        }
    }

    /// Hand `message` over for delivery.
    ///
    /// `Ok(true)` means the message was accepted: delivered when the queue
    /// runs jobs inline, stored for later otherwise.
    pub async fn send(&self, message: &Message) -> Result<bool, SendError> {
        self.enqueue(message).await.map(|_| true)
    }

    /// Like [`DeferredMailer::send`], returning the id of the delivery job.
    pub async fn enqueue(&self, message: &Message) -> Result<JobId, SendError> {
        let job = DeliveryJob::new(self.transport.clone(), message.clone());

        match self.mode {
            DeliveryMode::Deferred => {
                let envelope = JobEnvelope::encode(&job).map_err(into_send_error)?;
                let job_id = self.queue.push(envelope).await.map_err(into_send_error)?;
                tracing::debug!(
                    %job_id,
                    message_id = %message.id(),
                    queue = self.queue.name(),
                    "delivery job pushed"
                );
                Ok(job_id)
            }
            DeliveryMode::Passthrough => {
                let ctx = QueueExecutionContext::new(JobId::generate(), 1, "passthrough");
                job.execute(&ctx).await?;
                Ok(ctx.job_id)
            }
        }
    }

    /// Send each message in order. Returns how many were accepted; stops at
    /// the first error.
    pub async fn send_multiple<'a, I>(&self, messages: I) -> Result<usize, SendError>
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let mut accepted = 0;
        for message in messages {
            self.send(message).await?;
            accepted += 1;
        }
        Ok(accepted)
    }
}

/// Inline queues report the job's own failure; anything else means the
/// queue could not take the job.
fn into_send_error(err: QueueError) -> SendError {
    match err {
        QueueError::JobFailed(e) => e,
        other => SendError::QueueUnavailable(other.to_string()),
    }
}
