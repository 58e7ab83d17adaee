//! Transports: the capability that actually delivers a [`Message`].
//!
//! Transports are never serialized. A job carries a [`TransportConfig`] (plain
//! data) and the worker rebuilds the live transport from it with
//! [`TransportConfig::build`].

mod config;
pub mod dsn;
mod file;
mod null;
mod smtp;

pub use config::TransportConfig;
pub use dsn::{Dsn, DsnError, SmtpSettings};
pub use file::FileTransport;
pub use null::NullTransport;
pub use smtp::SmtpTransport;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Message;
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("delivery rejected: {reason}")]
    Rejected { permanent: bool, reason: String },

    #[error("invalid transport configuration: {0}")]
    Config(String),

    #[error("address not accepted by transport: {0}")]
    Address(String),

    #[error("message could not be encoded: {0}")]
    Encode(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Io(_) => ErrorKind::Transient,
            TransportError::Rejected { permanent, .. } => {
                if *permanent {
                    ErrorKind::Permanent
                } else {
                    ErrorKind::Transient
                }
            }
            TransportError::Config(_) | TransportError::Address(_) | TransportError::Encode(_) => {
                ErrorKind::Permanent
            }
        }
    }
}

impl From<crate::error::SendError> for TransportError {
    fn from(e: crate::error::SendError) -> Self {
        TransportError::Encode(e.to_string())
    }
}

impl From<DsnError> for TransportError {
    fn from(e: DsnError) -> Self {
        TransportError::Config(e.to_string())
    }
}

/// Protocol-level delivery of a composed message.
///
/// Implementations must be safe to share between workers; `send` is not
/// assumed to be idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs (`file`, `null`, `smtp`).
    fn name(&self) -> &'static str;

    async fn send(&self, message: &Message) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_kind_follows_permanence() {
        let soft = TransportError::Rejected {
            permanent: false,
            reason: "421 try later".into(),
        };
        let hard = TransportError::Rejected {
            permanent: true,
            reason: "550 no such user".into(),
        };

        assert_eq!(soft.kind(), ErrorKind::Transient);
        assert_eq!(hard.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn dsn_errors_become_config_errors() {
        let err = TransportError::from(DsnError::MissingHost);
        assert!(matches!(err, TransportError::Config(_)));
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }
}
