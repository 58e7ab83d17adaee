//! DSN strings for transports: `null://`, `file://<path>`,
//! `smtp://[user[:pass]@]host[:port][/helo][?timeout=<secs>&helo=<name>]`.
//!
//! Parsing produces typed settings; nothing here opens a connection.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::{Host, Url};

pub const DEFAULT_SMTP_PORT: u16 = 25;
pub const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DsnError {
    #[error("DSN must look like scheme://...")]
    MissingScheme,

    #[error("unsupported DSN scheme: {0}")]
    UnknownScheme(String),

    #[error("malformed DSN: {0}")]
    Malformed(url::ParseError),

    #[error("DSN is missing a host")]
    MissingHost,

    #[error("file DSN is missing a path")]
    MissingPath,

    #[error("invalid value for option {name}: {value}")]
    InvalidOption { name: String, value: String },

    #[error("unknown DSN option: {0}")]
    UnknownOption(String),

    #[error("invalid percent-encoding in DSN")]
    InvalidEncoding,
}

impl From<url::ParseError> for DsnError {
    fn from(e: url::ParseError) -> Self {
        match e {
            url::ParseError::EmptyHost => DsnError::MissingHost,
            other => DsnError::Malformed(other),
        }
    }
}

/// SMTP relay settings parsed from an `smtp://` DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    /// Name announced in EHLO; the transport default is used when absent.
    pub helo: Option<String>,
}

/// A parsed transport DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dsn {
    /// Accepts and discards every message.
    Null,
    /// Writes messages as files under a directory.
    File { path: PathBuf },
    /// Plaintext SMTP relay.
    Smtp(SmtpSettings),
}

impl FromStr for Dsn {
    type Err = DsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = s.split_once("://").ok_or(DsnError::MissingScheme)?;

        match scheme.to_ascii_lowercase().as_str() {
            "null" => Ok(Dsn::Null),
            // Not parsed as a URL: `file://runtime/mail` is a relative path,
            // not a host.
            "file" => {
                let location = rest.split_once('?').map_or(rest, |(path, _)| path);
                if location.is_empty() {
                    return Err(DsnError::MissingPath);
                }
                Ok(Dsn::File {
                    path: PathBuf::from(decode(location)?),
                })
            }
            "smtp" => parse_smtp(&Url::parse(s)?).map(Dsn::Smtp),
            other => Err(DsnError::UnknownScheme(other.to_string())),
        }
    }
}

fn parse_smtp(url: &Url) -> Result<SmtpSettings, DsnError> {
    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        // Unbracketed, as the connector resolves it.
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => return Err(DsnError::MissingHost),
    };

    let username = match url.username() {
        "" => None,
        user => Some(decode(user)?),
    };
    let password = url.password().map(decode).transpose()?;

    let path = url.path().trim_matches('/');
    let mut settings = SmtpSettings {
        host,
        port: url.port().unwrap_or(DEFAULT_SMTP_PORT),
        username,
        password,
        timeout: DEFAULT_SMTP_TIMEOUT,
        helo: (!path.is_empty()).then(|| decode(path)).transpose()?,
    };

    for (name, value) in url.query_pairs() {
        let invalid = || DsnError::InvalidOption {
            name: name.to_string(),
            value: value.to_string(),
        };
        match &*name {
            "timeout" => {
                let secs = value.parse::<u64>().map_err(|_| invalid())?;
                settings.timeout = Duration::from_secs(secs);
            }
            "helo" if !value.is_empty() => settings.helo = Some(value.to_string()),
            "helo" => return Err(invalid()),
            other => return Err(DsnError::UnknownOption(other.to_string())),
        }
    }

    Ok(settings)
}

fn decode(input: &str) -> Result<String, DsnError> {
    percent_decode_str(input)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| DsnError::InvalidEncoding)
}
