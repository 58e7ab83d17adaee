use std::sync::Arc;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use super::{SmtpSettings, Transport, TransportError};
use crate::domain::Message;
use crate::ports::{Clock, SystemClock};

/// Plaintext SMTP relay built on lettre.
///
/// The envelope comes from the built message, so Bcc recipients are relayed
/// without appearing in the headers.
#[derive(Clone)]
pub struct SmtpTransport {
    inner: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    host: String,
    clock: Arc<dyn Clock>,
}

impl SmtpTransport {
    pub fn new(settings: SmtpSettings) -> Self {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            .port(settings.port)
            .timeout(Some(settings.timeout));

        if let Some(username) = settings.username {
            let password = settings.password.unwrap_or_default();
            builder = builder.credentials(Credentials::new(username, password));
        }
        if let Some(helo) = settings.helo {
            builder = builder.hello_name(ClientId::Domain(helo));
        }

        Self {
            inner: Arc::new(builder.build()),
            host: settings.host,
            clock: Arc::new(SystemClock),
        }
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let email = message.to_email(self.clock.now())?;

        self.inner
            .send(email)
            .await
            .map_err(|e| TransportError::Rejected {
                permanent: e.is_permanent(),
                reason: e.to_string(),
            })?;

        tracing::debug!(message_id = %message.id(), host = %self.host, "message relayed");
        Ok(())
    }
}
