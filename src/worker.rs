//! Queue consumers.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{CompletionRecord, ExecutorError, TaskExecutor, TaskQueue, TaskgateError};

/// Tuning for [`dequeue_and_execute`] and [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Number of concurrent consumer loops.
    pub workers: usize,
    /// Idle pause between empty claims.
    pub poll_interval: Duration,
    /// Upper bound of the random jitter added to `poll_interval`.
    pub poll_jitter: Duration,
    /// How long a claim stays exclusive before it may be redelivered.
    pub lease: Duration,
    /// Delay before a record that failed fatally becomes eligible again.
    pub retry_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(250),
            poll_jitter: Duration::from_millis(50),
            lease: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// What happened to one claimed record.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Executed and acknowledged.
    Completed(CompletionRecord),
    /// Failed non-fatally; logged and acknowledged.
    FailedAcked {
        /// The task.
        task_id: Uuid,
        /// Reported failure.
        error: ExecutorError,
    },
    /// Failed fatally; released back to pending.
    FailedReleased {
        /// The task.
        task_id: Uuid,
        /// Reported failure.
        error: ExecutorError,
    },
    /// The lease expired before the ack or release; another consumer owns the
    /// record now.
    LeaseLost {
        /// The task.
        task_id: Uuid,
    },
}

/// Claim one eligible record, run it through `executor` exactly once, then
/// acknowledge or release it.
///
/// Returns `Ok(None)` when nothing was eligible. No queue lock is held while
/// the executor runs; only the record's lease.
pub async fn dequeue_and_execute(
    queue: &dyn TaskQueue,
    executor: &dyn TaskExecutor,
    options: &WorkerOptions,
) -> Result<Option<ExecutionOutcome>, TaskgateError> {
    let lease_ms = duration_ms(options.lease);

    let Some(claim) = queue.claim(lease_ms).await? else {
        return Ok(None);
    };

    let task_id = claim.record.id;
    tracing::debug!(task_id = %task_id, attempt = claim.attempt, "task.claimed");

    let outcome = match executor.execute(&claim.record).await {
        Ok(completion) => {
            if !queue.ack(&claim).await? {
                tracing::warn!(task_id = %task_id, "lease lost before ack");
                return Ok(Some(ExecutionOutcome::LeaseLost { task_id }));
            }

            ExecutionOutcome::Completed(completion)
        }
        Err(error) if !error.is_fatal() => {
            tracing::warn!(task_id = %task_id, error = %error, "task failed, acknowledging");

            if !queue.ack(&claim).await? {
                return Ok(Some(ExecutionOutcome::LeaseLost { task_id }));
            }

            ExecutionOutcome::FailedAcked { task_id, error }
        }
        Err(error) => {
            tracing::error!(task_id = %task_id, attempt = claim.attempt, error = %error, "task failed, releasing for redelivery");

            if !queue.release(&claim, duration_ms(options.retry_delay)).await? {
                return Ok(Some(ExecutionOutcome::LeaseLost { task_id }));
            }

            ExecutionOutcome::FailedReleased { task_id, error }
        }
    };

    Ok(Some(outcome))
} // end fn dequeue_and_execute

/// A set of consumer loops draining one queue.
///
/// Each loop calls [`dequeue_and_execute`] back to back while work is
/// available and sleeps `poll_interval` plus jitter when idle. Cancellation is
/// observed only between tasks, so a running execution always finishes and
/// is acknowledged before its loop exits.
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `options.workers` loops on the current tokio runtime.
    pub fn spawn(
        queue: Arc<dyn TaskQueue>,
        executor: Arc<dyn TaskExecutor>,
        options: WorkerOptions,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..options.workers.max(1))
            .map(|worker| {
                let queue = queue.clone();
                let executor = executor.clone();
                let options = options.clone();
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    run_worker(worker, queue, executor, options, cancel).await;
                })
            })
            .collect();

        Self { cancel, handles }
    }

    /// Number of running loops.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no loops.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every loop and wait for in-flight tasks to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        for result in futures::future::join_all(self.handles).await {
            if let Err(err) = result {
                tracing::error!(error = ?err, "worker task panicked");
            }
        }
    }
}

/// Cancel `cancel` once `signal` resolves.
///
/// A signal listener that fails to install is logged and never resolves, so
/// the process keeps serving instead of shutting down right after start.
pub async fn cancel_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        tracing::error!(error = ?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    cancel.cancel();
}

async fn run_worker(
    worker: usize,
    queue: Arc<dyn TaskQueue>,
    executor: Arc<dyn TaskExecutor>,
    options: WorkerOptions,
    cancel: CancellationToken,
) {
    tracing::debug!(worker, "worker.started");

    while !cancel.is_cancelled() {
        let idle = match dequeue_and_execute(queue.as_ref(), executor.as_ref(), &options).await {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(err) => {
                tracing::error!(worker, error = %err, "worker.claim.error");
                true
            }
        };

        if !idle {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(idle_pause(&options)) => {}
        }
    }

    tracing::debug!(worker, "worker.stopped");
} // end fn run_worker

fn idle_pause(options: &WorkerOptions) -> Duration {
    let jitter_ms = duration_ms(options.poll_jitter);

    if jitter_ms == 0 {
        return options.poll_interval;
    }

    options.poll_interval + Duration::from_millis(rand::random_range(0..=jitter_ms))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
