//! Composed message model and its builder.
//!
//! A [`Message`] is immutable once built: fields are private and every
//! instance (including one deserialized from a queued job) has passed
//! validation.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use lettre::message::header::{HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use crate::error::SendError;

/// Header names the message sets itself; custom headers may not override them.
const RESERVED_HEADERS: &[&str] = &[
    "bcc",
    "cc",
    "content-transfer-encoding",
    "content-type",
    "date",
    "from",
    "message-id",
    "mime-version",
    "reply-to",
    "subject",
    "to",
];

/// The body content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum Body {
    /// Plain text only.
    Text(String),
    /// HTML only.
    Html(String),
    /// Both plain text and HTML (multipart/alternative).
    Multipart { text: String, html: String },
}

impl Body {
    pub fn text(&self) -> Option<&str> {
        match self {
            Body::Text(text) | Body::Multipart { text, .. } => Some(text),
            Body::Html(_) => None,
        }
    }

    pub fn html(&self) -> Option<&str> {
        match self {
            Body::Html(html) | Body::Multipart { html, .. } => Some(html),
            Body::Text(_) => None,
        }
    }
}

/// A fully composed message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MessageParts")]
pub struct Message {
    id: MessageId,
    from: String,
    to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    subject: String,
    body: Body,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    headers: Vec<(String, String)>,
}

/// Unvalidated wire shape; converting it into a [`Message`] re-runs validation.
#[derive(Deserialize)]
struct MessageParts {
    id: MessageId,
    from: String,
    to: Vec<String>,
    #[serde(default)]
    cc: Vec<String>,
    #[serde(default)]
    bcc: Vec<String>,
    #[serde(default)]
    reply_to: Option<String>,
    subject: String,
    body: Body,
    #[serde(default)]
    headers: Vec<(String, String)>,
}

impl TryFrom<MessageParts> for Message {
    type Error = SendError;

    fn try_from(parts: MessageParts) -> Result<Self, Self::Error> {
        let message = Message {
            id: parts.id,
            from: parts.from,
            to: parts.to,
            cc: parts.cc,
            bcc: parts.bcc,
            reply_to: parts.reply_to,
            subject: parts.subject,
            body: parts.body,
            headers: parts.headers,
        };
        message.validate()?;
        Ok(message)
    }
}

impl Message {
    /// Create a new message builder.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &[String] {
        &self.to
    }

    pub fn cc(&self) -> &[String] {
        &self.cc
    }

    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Every envelope recipient: to, then cc, then bcc.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }

    fn validate(&self) -> Result<(), SendError> {
        parse_mailbox(&self.from)?;

        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(SendError::invalid("at least one recipient required"));
        }
        for address in self.recipients() {
            parse_mailbox(address)?;
        }
        if let Some(reply_to) = &self.reply_to {
            parse_mailbox(reply_to)?;
        }

        validate_header_value("Subject", &self.subject)?;
        for (name, value) in &self.headers {
            validate_header_name(name)?;
            validate_header_value(name, value)?;
        }

        Ok(())
    }

    /// Build the MIME message handed to transports.
    ///
    /// Headers are RFC 2047 encoded and folded by lettre, bodies get a
    /// 7bit, quoted-printable or base64 transfer encoding as their content
    /// requires, and Bcc only ends up in the envelope.
    pub fn to_email(&self, date: DateTime<Utc>) -> Result<lettre::Message, SendError> {
        let from = parse_mailbox(&self.from)?;
        let message_id = format!("<{}@{}>", self.id.as_ulid(), from.email.domain());

        let mut builder = lettre::Message::builder()
            .message_id(Some(message_id))
            .date(SystemTime::from(date))
            .from(from)
            .subject(self.subject.as_str());
        for address in &self.to {
            builder = builder.to(parse_mailbox(address)?);
        }
        for address in &self.cc {
            builder = builder.cc(parse_mailbox(address)?);
        }
        for address in &self.bcc {
            builder = builder.bcc(parse_mailbox(address)?);
        }
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(parse_mailbox(reply_to)?);
        }
        for (name, value) in &self.headers {
            let name = HeaderName::new_from_ascii(name.clone())
                .map_err(|_| SendError::invalid(format!("invalid header name: {name:?}")))?;
            builder = builder.raw_header(HeaderValue::new(name, value.clone()));
        }

        let email = match &self.body {
            Body::Text(text) => builder.singlepart(SinglePart::plain(text.clone())),
            Body::Html(html) => builder.singlepart(SinglePart::html(html.clone())),
            Body::Multipart { text, html } => {
                builder.multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))
            }
        };
        email.map_err(|e| SendError::invalid(e.to_string()))
    }

    /// Render as an RFC 5322 document with CRLF line endings.
    ///
    /// Bcc recipients are never rendered.
    pub fn render(&self, date: DateTime<Utc>) -> Result<Vec<u8>, SendError> {
        Ok(self.to_email(date)?.formatted())
    }
}

/// Parse one address, with or without a display name
/// (`admin@email.local`, `Admin <admin@email.local>`).
pub(crate) fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    // The mailbox grammar stops at the first address, so anything that could
    // smuggle a second one (or a header) is refused up front.
    if address.chars().any(|c| c.is_control() || c == ',' || c == ';') {
        return Err(SendError::invalid(format!("invalid address: {address:?}")));
    }
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| SendError::invalid(format!("invalid address {address:?}: {e}")))
}

fn validate_header_name(name: &str) -> Result<(), SendError> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
        return Err(SendError::invalid(format!("invalid header name: {name:?}")));
    }
    if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(SendError::invalid(format!(
            "header {name} is set by the message itself"
        )));
    }
    Ok(())
}

fn validate_header_value(name: &str, value: &str) -> Result<(), SendError> {
    if value.contains(['\r', '\n']) {
        return Err(SendError::invalid(format!(
            "header {name} must not contain line breaks"
        )));
    }
    Ok(())
}

/// Builder for constructing [`Message`] instances.
#[derive(Debug, Default, Clone)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    reply_to: Option<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
    headers: Vec<(String, String)>,
}

impl MessageBuilder {
    /// Set the sender address (required).
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Add a primary recipient.
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Add multiple primary recipients.
    pub fn to_many(mut self, addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.to.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set plain text body content.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set HTML body content.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Add an extra header. Standard headers (From, Subject, ...) are rejected
    /// at build time.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Build the message, validating required fields.
    pub fn build(self) -> Result<Message, SendError> {
        let from = self
            .from
            .ok_or_else(|| SendError::invalid("from address required"))?;

        let body = match (self.text, self.html) {
            (Some(text), Some(html)) => Body::Multipart { text, html },
            (None, Some(html)) => Body::Html(html),
            (text, None) => Body::Text(text.unwrap_or_default()),
        };

        let message = Message {
            id: MessageId::generate(),
            from,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            reply_to: self.reply_to,
            subject: self.subject.unwrap_or_default(),
            body,
            headers: self.headers,
        };
        message.validate()?;
        Ok(message)
    }
}
