//! postbox-core
//!
//! Deferred mail delivery over a job queue.
//!
//! # モジュール構成
//! - **domain**: ids, messages
//! - **transport**: the capability that delivers a message (file, null, smtp)
//! - **job**: serializable jobs, envelopes, the job registry
//! - **queue**: inline, in-memory and spool-directory queues
//! - **worker**: worker group draining a queue
//! - **mailer**: `DeferredMailer`, the sending surface
//! - **config** / **app**: typed TOML configuration and explicit wiring
//!
//! ```ignore
//! let config = PostboxConfig::load("postbox.toml")?;
//! let app = App::from_config(config).await?;
//!
//! let message = app
//!     .mailer()
//!     .compose()
//!     .to("test@email.local")
//!     .subject("hello")
//!     .text("body")
//!     .build()?;
//! app.mailer().send(&message).await?;
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod job;
pub mod logging;
pub mod mailer;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod transport;
pub mod worker;

pub use app::{App, AppBuilder, BuildError, QueueHandle};
pub use config::{ConfigError, PostboxConfig};
pub use domain::{JobId, Message, MessageBuilder, MessageId};
pub use error::{ErrorKind, SendError};
pub use job::{DeliveryJob, Job, JobEnvelope, JobRegistry, QueueExecutionContext};
pub use mailer::{DeferredMailer, DeliveryMode};
pub use queue::{FileQueue, InMemoryQueue, LeaseQueue, Queue, QueueError, RetryPolicy, SyncQueue};
pub use transport::{Transport, TransportConfig, TransportError};
pub use worker::WorkerGroup;
