//! Command-line front end for postbox.
//!
//! - `send`: compose one message and hand it to the configured queue
//! - `work`: run workers against the configured queue
//! - `check`: validate the configuration and transport
//! - `status`: print job counts and file-queue dead letters

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use postbox_core::config::QueueConfig;
use postbox_core::observability::QueueCounts;
use postbox_core::{App, AppBuilder, PostboxConfig, QueueHandle, logging};

const IDLE_POLL: Duration = Duration::from_millis(100);

/// Deferred mail delivery over a job queue
#[derive(Parser, Debug)]
#[command(name = "postbox")]
#[command(about = "Queue and deliver mail", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "postbox.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue one message for delivery
    Send {
        /// Recipient (repeatable)
        #[arg(long, required = true)]
        to: Vec<String>,

        /// Carbon-copy recipient (repeatable)
        #[arg(long)]
        cc: Vec<String>,

        /// Sender; defaults to `mailer.from` from the configuration
        #[arg(long)]
        from: Option<String>,

        #[arg(long, default_value = "")]
        subject: String,

        /// Plain-text body
        #[arg(long)]
        body: String,
    },
    /// Run workers against the configured queue
    Work {
        /// Exit once the queue has nothing left to run
        #[arg(long)]
        drain: bool,
    },
    /// Validate the configuration and transport settings
    Check,
    /// Show job counts by state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let config = PostboxConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::Send {
            to,
            cc,
            from,
            subject,
            body,
        } => send(config, to, cc, from, subject, body).await,
        Command::Work { drain } => work(config, drain).await,
        Command::Check => check(&config),
        Command::Status => {
            let app = AppBuilder::new(config).without_workers().build().await?;
            print_counts(&app.queue().counts().await?);
            if let QueueHandle::File(queue) = app.queue() {
                for dead in queue.dead_letters().await? {
                    println!(
                        "dead {} {} attempts={} error={}",
                        dead.job_id,
                        dead.job_type,
                        dead.attempts,
                        dead.last_error.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }
    }
}

async fn send(
    config: PostboxConfig,
    to: Vec<String>,
    cc: Vec<String>,
    from: Option<String>,
    subject: String,
    body: String,
) -> anyhow::Result<()> {
    let mut app = AppBuilder::new(config).without_workers().build().await?;

    let mut builder = app.mailer().compose().to_many(to).subject(subject).text(body);
    for address in cc {
        builder = builder.cc(address);
    }
    if let Some(from) = from {
        builder = builder.from(from);
    }
    let message = builder.build().context("composing message")?;

    let job_id = app.mailer().enqueue(&message).await?;
    println!("accepted {job_id} (message {})", message.id());

    // Jobs held in process memory must run before we exit; the file queue
    // keeps them for `postbox work`.
    match app.queue().clone() {
        QueueHandle::Sync(_) => {
            let summary = app.run_pending().await;
            if summary.failed > 0 {
                bail!(
                    "{} of {} pending jobs failed, see log for details",
                    summary.failed,
                    summary.executed
                );
            }
        }
        QueueHandle::Memory(_) => {
            app.start_workers();
            let counts = app.wait_idle(IDLE_POLL).await?;
            if counts.dead > 0 {
                bail!("delivery failed, see log for details");
            }
        }
        QueueHandle::File(queue) => {
            println!("spooled in {}", queue.root().display());
        }
    }

    app.shutdown().await;
    Ok(())
}

async fn work(config: PostboxConfig, drain: bool) -> anyhow::Result<()> {
    if matches!(config.queue, QueueConfig::Sync { .. }) {
        bail!("the sync queue has no workers; configure kind = \"memory\" or \"file\"");
    }

    let app = App::from_config(config).await?;

    if drain {
        tracing::info!("draining queue");
        let counts = app.wait_idle(IDLE_POLL).await?;
        print_counts(&counts);
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("waiting for ctrl-c")?;
        tracing::info!("shutdown requested");
    }

    app.shutdown().await;
    Ok(())
}

fn check(config: &PostboxConfig) -> anyhow::Result<()> {
    let transport = config.transport.build().context("building transport")?;
    println!(
        "configuration ok: transport={} mode={:?} queue={}",
        transport.name(),
        config.mailer.mode,
        queue_kind(&config.queue)
    );
    Ok(())
}

fn queue_kind(queue: &QueueConfig) -> &'static str {
    match queue {
        QueueConfig::Sync { .. } => "sync",
        QueueConfig::Memory { .. } => "memory",
        QueueConfig::File { .. } => "file",
    }
}

fn print_counts(counts: &QueueCounts) {
    println!(
        "queued={} running={} retry_scheduled={} succeeded={} dead={}",
        counts.queued, counts.running, counts.retry_scheduled, counts.succeeded, counts.dead
    );
}
