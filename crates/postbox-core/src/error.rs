use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

/// ErrorKind は実行エラーの分類
///
/// Queues consult it to decide between retry and dead-letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Worth retrying (connection refused, 4xx SMTP reply, timeout).
    Transient,
    /// Retrying cannot help (bad address, 5xx SMTP reply, invalid config).
    Permanent,
    /// Storage or queue backing failure.
    Infrastructure,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// Errors surfaced by `DeferredMailer::send` and `DeliveryJob::execute`.
///
/// `TransportFailure` only ever reaches the original caller of `send` when the
/// queue executes inline; with a deferred queue it is reported to the queue's
/// own failure channel (retry, dead-letter, log).
#[derive(Debug, Error)]
pub enum SendError {
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::QueueUnavailable(_) => ErrorKind::Infrastructure,
            SendError::TransportFailure(e) => e.kind(),
            SendError::InvalidMessage(_) => ErrorKind::Permanent,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SendError::InvalidMessage(reason.into())
    }
}
