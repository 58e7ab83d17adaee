//! Spool-directory queue.
//!
//! Layout under the root directory:
//! - `<ulid>.job`               pending job (JSON [`SpoolEntry`])
//! - `<ulid>.<claim>.running`   claimed by a worker; `<claim>` is a ULID
//!   minted at claim time
//! - `.tmp_*`                   partial writes, never read
//! - `dead/<ulid>.job`          terminal failures
//!
//! Every write goes to a `.tmp_` file first and is renamed into place.
//! Claiming is a rename from `.job` to a `.running` name unique to that
//! claim, so two workers (or two processes) sharing a directory never run the
//! same job at once, and a lease only ever settles its own claim.
//!
//! A claim older than the lease timeout is assumed to belong to a dead
//! worker. The next scan renames it back to `.job`; the original holder then
//! finds its claim gone and reports [`QueueError::LeaseExpired`].

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Notify;
use ulid::Ulid;

use super::{DeadLetter, JobLease, LeaseQueue, Queue, QueueError, RetryPolicy};
use crate::domain::JobId;
use crate::error::ErrorKind;
use crate::job::JobEnvelope;
use crate::observability::QueueCounts;
use crate::ports::{Clock, SystemClock};

const JOB_EXT: &str = "job";
const RUNNING_EXT: &str = "running";
const TMP_PREFIX: &str = ".tmp_";
const DEAD_DIR: &str = "dead";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(600);

/// On-disk form of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolEntry {
    envelope: JobEnvelope,
    attempts: u32,
    #[serde(default)]
    not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    last_error: Option<String>,
}

impl SpoolEntry {
    fn new(envelope: JobEnvelope) -> Self {
        Self {
            envelope,
            attempts: 0,
            not_before: None,
            last_error: None,
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }
}

/// A `.running` file: which job, and which claim holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Claim {
    job: Ulid,
    token: Ulid,
}

impl Claim {
    fn file_name(&self) -> String {
        format!("{}.{}.{RUNNING_EXT}", self.job, self.token)
    }

    fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(RUNNING_EXT)?.strip_suffix('.')?;
        let (job, token) = stem.split_once('.')?;
        Some(Self {
            job: Ulid::from_string(job).ok()?,
            token: Ulid::from_string(token).ok()?,
        })
    }

    fn claimed_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.token.datetime())
    }
}

/// State shared between the queue and its leases.
struct Spool {
    root: PathBuf,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    notify: Notify,
    succeeded: AtomicUsize,
}

impl Spool {
    fn job_path(&self, id: Ulid) -> PathBuf {
        self.root.join(format!("{id}.{JOB_EXT}"))
    }

    fn claim_path(&self, claim: Claim) -> PathBuf {
        self.root.join(claim.file_name())
    }

    fn dead_dir(&self) -> PathBuf {
        self.root.join(DEAD_DIR)
    }

    async fn write_entry(
        &self,
        dir: &Path,
        id: Ulid,
        entry: &SpoolEntry,
    ) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        let tmp = dir.join(format!("{TMP_PREFIX}{id}.{JOB_EXT}"));
        let target = dir.join(format!("{id}.{JOB_EXT}"));

        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &target).await?;
        Ok(())
    }

    /// Names in `dir` that are not temporary files.
    async fn file_names(dir: &Path) -> Result<Vec<String>, QueueError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(TMP_PREFIX) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Ids of `.job` files in `dir`, oldest first.
    async fn list_jobs(dir: &Path) -> Result<Vec<Ulid>, QueueError> {
        let mut ids: Vec<Ulid> = Self::file_names(dir)
            .await?
            .iter()
            .filter_map(|name| name.strip_suffix(JOB_EXT)?.strip_suffix('.'))
            .filter_map(|stem| Ulid::from_string(stem).ok())
            .collect();
        // ULIDs are lexicographically sortable by creation time
        ids.sort();
        Ok(ids)
    }

    async fn list_claims(&self) -> Result<Vec<Claim>, QueueError> {
        Ok(Self::file_names(&self.root)
            .await?
            .iter()
            .filter_map(|name| Claim::parse(name))
            .collect())
    }

    async fn read_entry(path: &Path) -> Result<Option<SpoolEntry>, QueueError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Put claims older than the lease timeout back to pending.
    async fn recover_expired(&self, lease_timeout: Duration) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let timeout = chrono::Duration::from_std(lease_timeout).unwrap_or(chrono::Duration::MAX);
        let mut recovered = 0;

        for claim in self.list_claims().await? {
            if now.signed_duration_since(claim.claimed_at()) < timeout {
                continue;
            }
            match fs::rename(self.claim_path(claim), self.job_path(claim.job)).await {
                Ok(()) => {
                    tracing::warn!(
                        job_id = %JobId::from_ulid(claim.job),
                        claimed_at = %claim.claimed_at(),
                        "lease expired, job returned to the spool"
                    );
                    recovered += 1;
                }
                // Settled or recovered by someone else in the meantime.
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(recovered)
    }

    /// Move an entry that cannot be decoded out of the pending set.
    async fn quarantine(&self, id: Ulid, error: &serde_json::Error) {
        tracing::error!(job = %id, %error, "unreadable spool entry, moving to dead");
        let target = self.dead_dir().join(format!("{id}.{JOB_EXT}"));
        if let Err(e) = fs::rename(self.job_path(id), &target).await
            && e.kind() != IoErrorKind::NotFound
        {
            tracing::error!(job = %id, error = %e, "failed to move unreadable spool entry");
        }
    }

    /// Claim the oldest due job, if any.
    async fn claim_next(
        &self,
        lease_timeout: Duration,
    ) -> Result<Option<(Claim, SpoolEntry)>, QueueError> {
        if self.recover_expired(lease_timeout).await? > 0 {
            self.notify.notify_waiters();
        }
        let now = self.clock.now();

        for id in Self::list_jobs(&self.root).await? {
            let path = self.job_path(id);
            let entry = match Self::read_entry(&path).await {
                Ok(Some(entry)) => entry,
                // Claimed by someone else since the listing.
                Ok(None) => continue,
                Err(QueueError::Codec(e)) => {
                    self.quarantine(id, &e).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !entry.is_due(now) {
                continue;
            }

            let claim = Claim {
                job: id,
                token: Ulid::from_datetime(SystemTime::from(now)),
            };
            let running = self.claim_path(claim);
            match fs::rename(&path, &running).await {
                Ok(()) => {}
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            // Re-read what we actually claimed; the file may have been
            // rewritten between the first read and the rename.
            let Some(mut entry) = Self::read_entry(&running).await? else {
                continue;
            };
            entry.attempts += 1;
            return Ok(Some((claim, entry)));
        }
        Ok(None)
    }
}

/// Durable queue backed by a spool directory.
///
/// Any number of `FileQueue`s (in one process or several) may share a root
/// directory: jobs pushed through one are executed by whichever leases them
/// first. Opening a queue never touches claimed jobs, so a producer can open
/// the spool while workers are busy. `succeeded` in [`QueueCounts`] only
/// covers jobs acked through this instance, since finished jobs leave no file
/// behind.
pub struct FileQueue {
    spool: Arc<Spool>,
    poll_interval: Duration,
    lease_timeout: Duration,
    max_attempts: Option<u32>,
    closed: AtomicBool,
}

impl FileQueue {
    /// Open (creating if needed) the spool at `root`.
    pub async fn open(
        root: impl Into<PathBuf>,
        retry_policy: RetryPolicy,
    ) -> Result<Self, QueueError> {
        Self::open_with_clock(root, retry_policy, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        root: impl Into<PathBuf>,
        retry_policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        let spool = Spool {
            root: root.into(),
            retry_policy,
            clock,
            notify: Notify::new(),
            succeeded: AtomicUsize::new(0),
        };
        fs::create_dir_all(spool.dead_dir()).await?;

        Ok(Self {
            spool: Arc::new(spool),
            poll_interval: DEFAULT_POLL_INTERVAL,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            max_attempts: None,
            closed: AtomicBool::new(false),
        })
    }

    /// How often idle workers rescan the directory.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// How long a claim may stay unsettled before another worker takes the
    /// job over. Must exceed the longest expected delivery.
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.spool.root
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let dead_dir = self.spool.dead_dir();
        let mut dead = Vec::new();
        for id in Spool::list_jobs(&dead_dir).await? {
            let path = dead_dir.join(format!("{id}.{JOB_EXT}"));
            let letter = match Spool::read_entry(&path).await {
                Ok(Some(entry)) => DeadLetter {
                    job_id: JobId::from_ulid(id),
                    job_type: entry.envelope.job_type().to_string(),
                    attempts: entry.attempts,
                    last_error: entry.last_error,
                },
                Ok(None) => continue,
                Err(QueueError::Codec(e)) => DeadLetter {
                    job_id: JobId::from_ulid(id),
                    job_type: String::from("unknown"),
                    attempts: 0,
                    last_error: Some(format!("unreadable spool entry: {e}")),
                },
                Err(e) => return Err(e),
            };
            dead.push(letter);
        }
        Ok(dead)
    }
}

#[async_trait]
impl Queue for FileQueue {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn push(&self, envelope: JobEnvelope) -> Result<JobId, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let envelope = match self.max_attempts {
            Some(n) => envelope.with_max_attempts(n),
            None => envelope,
        };
        let job_id = envelope.job_id();

        self.spool
            .write_entry(&self.spool.root, job_id.as_ulid(), &SpoolEntry::new(envelope))
            .await?;

        tracing::debug!(%job_id, queue = self.name(), "job spooled");
        self.spool.notify.notify_one();
        Ok(job_id)
    }

    async fn counts_by_state(&self) -> Result<QueueCounts, QueueError> {
        let now = self.spool.clock.now();
        let mut counts = QueueCounts::default();

        for id in Spool::list_jobs(&self.spool.root).await? {
            match Spool::read_entry(&self.spool.job_path(id)).await {
                Ok(Some(entry)) if !entry.is_due(now) => counts.retry_scheduled += 1,
                Ok(Some(_)) => counts.queued += 1,
                // Unreadable entries never run; the next scan moves them to dead.
                Ok(None) | Err(QueueError::Codec(_)) => {}
                Err(e) => return Err(e),
            }
        }
        counts.running = self.spool.list_claims().await?.len();
        counts.dead = Spool::list_jobs(&self.spool.dead_dir()).await?.len();
        // Read last: ack bumps the counter before removing the running file.
        counts.succeeded = self.spool.succeeded.load(Ordering::SeqCst);
        Ok(counts)
    }
}

#[async_trait]
impl LeaseQueue for FileQueue {
    async fn lease(&self) -> Option<Box<dyn JobLease>> {
        loop {
            let notified = self.spool.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            match self.spool.claim_next(self.lease_timeout).await {
                Ok(Some((claim, entry))) => {
                    return Some(Box::new(FileLease {
                        claim,
                        entry,
                        spool: Arc::clone(&self.spool),
                    }));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    root = %self.spool.root.display(),
                    error = %e,
                    "spool scan failed"
                ),
            }

            tokio::select! {
                _ = notified => {},
                _ = tokio::time::sleep(self.poll_interval) => {},
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.spool.notify.notify_waiters();
    }
}

struct FileLease {
    claim: Claim,
    entry: SpoolEntry,
    spool: Arc<Spool>,
}

impl FileLease {
    fn lost(&self) -> QueueError {
        QueueError::LeaseExpired(JobId::from_ulid(self.claim.job))
    }
}

#[async_trait]
impl JobLease for FileLease {
    fn envelope(&self) -> &JobEnvelope {
        &self.entry.envelope
    }

    fn attempt(&self) -> u32 {
        self.entry.attempts
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        // Count first so the job is never invisible to `counts_by_state`.
        self.spool.succeeded.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = fs::remove_file(self.spool.claim_path(self.claim)).await {
            self.spool.succeeded.fetch_sub(1, Ordering::SeqCst);
            return Err(match e.kind() {
                IoErrorKind::NotFound => self.lost(),
                _ => e.into(),
            });
        }
        Ok(())
    }

    async fn fail(self: Box<Self>, kind: ErrorKind, error: String) -> Result<(), QueueError> {
        // Take the claim off the running set first; if it is already gone
        // another worker owns the job now.
        let running = self.spool.claim_path(self.claim);
        let settling = self.spool.root.join(format!("{TMP_PREFIX}{}", self.claim.file_name()));
        match fs::rename(&running, &settling).await {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => return Err(self.lost()),
            Err(e) => return Err(e.into()),
        }

        let FileLease { claim, mut entry, spool } = *self;
        let job_id = JobId::from_ulid(claim.job);
        entry.last_error = Some(error.clone());

        if !kind.is_retryable() || entry.attempts >= entry.envelope.max_attempts() {
            tracing::warn!(
                %job_id,
                attempts = entry.attempts,
                max_attempts = entry.envelope.max_attempts(),
                ?kind,
                %error,
                "job dead-lettered"
            );
            entry.not_before = None;
            spool.write_entry(&spool.dead_dir(), claim.job, &entry).await?;
        } else {
            let delay = spool.retry_policy.next_delay(entry.attempts);
            let now = spool.clock.now();
            let not_before = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now);
            tracing::warn!(
                %job_id,
                attempts = entry.attempts,
                max_attempts = entry.envelope.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                %error,
                "job failed, retry scheduled"
            );
            entry.not_before = Some(not_before);
            spool.write_entry(&spool.root, claim.job, &entry).await?;
            spool.notify.notify_one();
        }

        fs::remove_file(&settling).await?;
        Ok(())
    }
}
