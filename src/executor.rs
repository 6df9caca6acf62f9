//! Task execution.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use time::{OffsetDateTime, macros::format_description};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex, task::JoinHandle};
use uuid::Uuid;

use crate::{Clock, SubjectId, SystemClock, TaskRecord};

/// Append-only proof that a task ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    /// The executed task.
    pub task_id: Uuid,
    /// Subject the task ran for.
    pub subject_id: SubjectId,
    /// Completion instant, UTC.
    pub completed_at: OffsetDateTime,
}

impl CompletionRecord {
    /// The log line for this record, without a trailing newline:
    /// `{subjectId} - task completed at - {ISO8601}`.
    pub fn log_line(&self) -> String {
        let timestamp = self
            .completed_at
            // millisecond precision with a literal `Z`, e.g. 2024-05-01T12:00:00.123Z
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
            ))
            .unwrap_or_else(|_| self.completed_at.unix_timestamp().to_string());

        format!("{} - task completed at - {}", self.subject_id, timestamp)
    }
}

/// Failure reported by a [`TaskExecutor`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Logged; the record is still considered handled and is acknowledged.
    #[error("non-fatal executor failure: {0}")]
    NonFatal(String),

    /// The record is returned to pending for redelivery.
    #[error("fatal executor failure: {0}")]
    Fatal(String),
}

impl ExecutorError {
    /// Whether the queue should keep the record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutorError::Fatal(_))
    }
}

/// The unit of work run once per claimed record.
///
/// Delivery is at-least-once, so implementations should tolerate seeing the
/// same record twice.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `record`.
    async fn execute(&self, record: &TaskRecord) -> Result<CompletionRecord, ExecutorError>;
}

/// Appends one `{subjectId} - task completed at - {ISO8601}` line per task to
/// a file.
///
/// Task ids completed by this instance are remembered for `dedupe_ttl`, and
/// a redelivered id returns the earlier [`CompletionRecord`] without writing
/// a second line. At most `dedupe_capacity` ids are kept; past that the
/// oldest are forgotten first. Redelivery only happens after a lease lapses,
/// so the TTL needs to outlast the lease plus the worker retry delay.
///
/// Write failures are retried `max_attempts` times, `retry_backoff` apart,
/// and then reported as [`ExecutorError::Fatal`].
#[derive(Debug)]
pub struct CompletionLogExecutor {
    path: PathBuf,
    max_attempts: u32,
    retry_backoff: Duration,
    dedupe_ttl: Duration,
    dedupe_capacity: usize,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
    next_seq: AtomicU64,
    completed: DashMap<Uuid, Remembered>,
}

#[derive(Debug, Clone)]
struct Remembered {
    at_ms: u64,
    seq: u64,
    completion: CompletionRecord,
}

impl CompletionLogExecutor {
    /// Default write attempts before giving up.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Default pause between write attempts.
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

    /// Default time a completed id is remembered.
    pub const DEFAULT_DEDUPE_TTL: Duration = Duration::from_secs(10 * 60);

    /// Default cap on remembered ids.
    pub const DEFAULT_DEDUPE_CAPACITY: usize = 100_000;

    /// Create an executor appending to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Self::DEFAULT_RETRY_BACKOFF,
            dedupe_ttl: Self::DEFAULT_DEDUPE_TTL,
            dedupe_capacity: Self::DEFAULT_DEDUPE_CAPACITY,
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
            next_seq: AtomicU64::new(0),
            completed: DashMap::new(),
        }
    }

    /// Override the retry policy. `max_attempts` below 1 is raised to 1.
    pub fn with_retry(mut self, max_attempts: u32, retry_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = retry_backoff;
        self
    }

    /// Override how long and how many completed ids are remembered.
    /// `capacity` below 1 is raised to 1.
    pub fn with_dedupe(mut self, ttl: Duration, capacity: usize) -> Self {
        self.dedupe_ttl = ttl;
        self.dedupe_capacity = capacity.max(1);
        self
    }

    /// Age remembered ids on a custom clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The completion log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of completed ids currently remembered.
    pub fn remembered(&self) -> usize {
        self.completed.len()
    }

    /// Forget ids older than the dedupe TTL, then the oldest ids beyond the
    /// capacity. Returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let ttl_ms = u64::try_from(self.dedupe_ttl.as_millis()).unwrap_or(u64::MAX);
        let before = self.completed.len();

        self.completed
            .retain(|_, remembered| now_ms.saturating_sub(remembered.at_ms) < ttl_ms);

        let excess = self.completed.len().saturating_sub(self.dedupe_capacity);
        if excess > 0 {
            let mut by_age: Vec<(u64, u64, Uuid)> = self
                .completed
                .iter()
                .map(|entry| (entry.value().at_ms, entry.value().seq, *entry.key()))
                .collect();
            by_age.sort_unstable();

            for (_, _, id) in by_age.into_iter().take(excess) {
                self.completed.remove(&id);
            }
        }

        before.saturating_sub(self.completed.len())
    } // end method cleanup

    /// Run [`cleanup`](Self::cleanup) every `interval` on the current tokio
    /// runtime. The loop exits once the executor is dropped.
    pub fn run_cleanup_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let executor: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            // discard the first tick
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(executor) = executor.upgrade() else {
                    break;
                };

                let removed = executor.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "completed task ids forgotten");
                }
            }
        })
    } // end method run_cleanup_loop

    async fn append(&self, line: &str) -> std::io::Result<()> {
        // one writer at a time so lines never interleave
        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl TaskExecutor for CompletionLogExecutor {
    async fn execute(&self, record: &TaskRecord) -> Result<CompletionRecord, ExecutorError> {
        if let Some(previous) = self.completed.get(&record.id) {
            tracing::debug!(task_id = %record.id, "task already completed, skipping duplicate");
            return Ok(previous.completion.clone());
        }

        let completion = CompletionRecord {
            task_id: record.id,
            subject_id: record.subject_id.clone(),
            completed_at: OffsetDateTime::now_utc(),
        };

        let line = format!("{}\n", completion.log_line());
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.append(&line).await {
                Ok(()) => break,
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(error = ?err, attempt, path = %self.path.display(), "completion log write failed, retrying");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(err) => {
                    return Err(ExecutorError::Fatal(format!(
                        "writing {} failed after {attempt} attempts: {err}",
                        self.path.display()
                    )));
                }
            }
        }

        tracing::info!(task_id = %record.id, "{}", completion.log_line());
        self.completed.insert(
            record.id,
            Remembered {
                at_ms: self.clock.now_ms(),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                completion: completion.clone(),
            },
        );

        if self.completed.len() > self.dedupe_capacity {
            self.cleanup();
        }

        Ok(completion)
    } // end method execute
}
