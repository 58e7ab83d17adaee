//! Typed configuration, loaded from TOML and validated at startup.
//!
//! ```toml
//! [mailer]
//! mode = "deferred"
//! from = "admin@email.local"
//!
//! [transport]
//! kind = "file"
//! path = "runtime/mail/queue"
//!
//! [queue]
//! kind = "file"
//! path = "runtime/jobs"
//! workers = 2
//!
//! [queue.retry]
//! base_delay_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::message::parse_mailbox;
use crate::mailer::DeliveryMode;
use crate::queue::RetryPolicy;
use crate::transport::TransportConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(reason.into())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostboxConfig {
    #[serde(default)]
    pub mailer: MailerConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailerConfig {
    #[serde(default)]
    pub mode: DeliveryMode,
    /// Default sender for composed messages.
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueConfig {
    /// Inline execution. With `handle = false` jobs wait for an explicit run.
    Sync {
        #[serde(default = "default_handle")]
        handle: bool,
    },
    /// Process-local queue drained by worker tasks.
    Memory {
        #[serde(default = "default_workers")]
        workers: usize,
        capacity: Option<usize>,
        max_attempts: Option<u32>,
        #[serde(default)]
        retry: RetrySettings,
    },
    /// Spool directory shared with other processes.
    File {
        path: PathBuf,
        #[serde(default = "default_workers")]
        workers: usize,
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
        /// Seconds a claimed job may run before another worker takes it over.
        #[serde(default = "default_lease_timeout_secs")]
        lease_timeout_secs: u64,
        max_attempts: Option<u32>,
        #[serde(default)]
        retry: RetrySettings,
    },
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig::Sync {
            handle: default_handle(),
        }
    }
}

fn default_handle() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_lease_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter_ms: policy.jitter.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(invalid(format!(
                "queue.retry.multiplier must be a number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid(
                "queue.retry.max_delay_ms must not be smaller than base_delay_ms",
            ));
        }
        Ok(())
    }
}

impl PostboxConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(from) = &self.mailer.from {
            parse_mailbox(from).map_err(|e| invalid(format!("mailer.from: {e}")))?;
        }

        self.transport
            .validate()
            .map_err(|e| invalid(format!("transport: {e}")))?;

        match &self.queue {
            QueueConfig::Sync { .. } => {}
            QueueConfig::Memory {
                workers,
                capacity,
                max_attempts,
                retry,
            } => {
                check_workers(*workers)?;
                check_max_attempts(*max_attempts)?;
                if *capacity == Some(0) {
                    return Err(invalid("queue.capacity must be at least 1"));
                }
                retry.validate()?;
            }
            QueueConfig::File {
                path,
                workers,
                poll_interval_ms,
                lease_timeout_secs,
                max_attempts,
                retry,
            } => {
                if path.as_os_str().is_empty() {
                    return Err(invalid("queue.path must not be empty"));
                }
                check_workers(*workers)?;
                check_max_attempts(*max_attempts)?;
                if *poll_interval_ms == 0 {
                    return Err(invalid("queue.poll_interval_ms must be at least 1"));
                }
                if *lease_timeout_secs == 0 {
                    return Err(invalid("queue.lease_timeout_secs must be at least 1"));
                }
                retry.validate()?;
            }
        }
        Ok(())
    }
}

fn check_workers(workers: usize) -> Result<(), ConfigError> {
    if workers == 0 {
        return Err(invalid("queue.workers must be at least 1"));
    }
    Ok(())
}

fn check_max_attempts(max_attempts: Option<u32>) -> Result<(), ConfigError> {
    if max_attempts == Some(0) {
        return Err(invalid("queue.max_attempts must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn minimal_config_uses_inline_queue() {
        let config = PostboxConfig::from_toml_str(
            r#"
            [transport]
            kind = "dsn"
            dsn = "null://"
            "#,
        )
        .unwrap();

        assert_eq!(config.mailer, MailerConfig::default());
        assert_eq!(config.queue, QueueConfig::Sync { handle: true });
        assert_eq!(config.transport, TransportConfig::dsn("null://"));
    }

    #[test]
    fn full_file_queue_config() {
        let config = PostboxConfig::from_toml_str(
            r#"
            [mailer]
            mode = "passthrough"
            from = "admin@email.local"

            [transport]
            kind = "file"
            path = "runtime/mail/queue"

            [queue]
            kind = "file"
            path = "runtime/jobs"
            workers = 4
            poll_interval_ms = 50
            lease_timeout_secs = 120
            max_attempts = 5

            [queue.retry]
            base_delay_ms = 100
            jitter_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.mailer.mode, DeliveryMode::Passthrough);
        assert_eq!(config.mailer.from.as_deref(), Some("admin@email.local"));
        let QueueConfig::File {
            path,
            workers,
            poll_interval_ms,
            lease_timeout_secs,
            max_attempts,
            retry,
        } = config.queue
        else {
            panic!("expected file queue");
        };
        assert_eq!(path, PathBuf::from("runtime/jobs"));
        assert_eq!(workers, 4);
        assert_eq!(poll_interval_ms, 50);
        assert_eq!(lease_timeout_secs, 120);
        assert_eq!(max_attempts, Some(5));

        let policy = retry.policy();
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter, Duration::from_millis(20));
    }

    #[rstest]
    #[case::bad_from(
        "[mailer]\nfrom = \"nobody\"\n[transport]\nkind = \"dsn\"\ndsn = \"null://\"",
        "mailer.from"
    )]
    #[case::bad_dsn("[transport]\nkind = \"dsn\"\ndsn = \"pigeon://coop\"", "transport")]
    #[case::no_workers(
        "[transport]\nkind = \"dsn\"\ndsn = \"null://\"\n[queue]\nkind = \"memory\"\nworkers = 0",
        "queue.workers"
    )]
    #[case::zero_poll(
        "[transport]\nkind = \"dsn\"\ndsn = \"null://\"\n[queue]\nkind = \"file\"\npath = \"q\"\npoll_interval_ms = 0",
        "poll_interval_ms"
    )]
    #[case::zero_lease(
        "[transport]\nkind = \"dsn\"\ndsn = \"null://\"\n[queue]\nkind = \"file\"\npath = \"q\"\nlease_timeout_secs = 0",
        "lease_timeout_secs"
    )]
    #[case::shrinking_backoff(
        "[transport]\nkind = \"dsn\"\ndsn = \"null://\"\n[queue]\nkind = \"memory\"\n[queue.retry]\nmultiplier = 0.5",
        "multiplier"
    )]
    fn rejects_invalid_values(#[case] raw: &str, #[case] mentions: &str) {
        let err = PostboxConfig::from_toml_str(raw).unwrap_err();
        assert!(
            matches!(&err, ConfigError::Invalid(reason) if reason.contains(mentions)),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    #[case::missing_transport("[mailer]\nmode = \"deferred\"")]
    #[case::unknown_mode("[mailer]\nmode = \"later\"\n[transport]\nkind = \"dsn\"\ndsn = \"null://\"")]
    #[case::unknown_queue("[transport]\nkind = \"dsn\"\ndsn = \"null://\"\n[queue]\nkind = \"redis\"")]
    #[case::typo("[transport]\nkind = \"dsn\"\ndsn = \"null://\"\n[mailer]\nfrm = \"a@b.c\"")]
    fn rejects_malformed_toml(#[case] raw: &str) {
        assert!(matches!(
            PostboxConfig::from_toml_str(raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = PostboxConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
