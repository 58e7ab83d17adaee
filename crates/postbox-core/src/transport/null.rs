use async_trait::async_trait;

use super::{Transport, TransportError};
use crate::domain::Message;

/// Accepts every message and delivers nothing (`null://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        tracing::debug!(message_id = %message.id(), "null transport discarded message");
        Ok(())
    }
}
