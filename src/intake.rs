//! Submission intake: admission, then enqueue.

use std::sync::Arc;

use crate::{DualAdmissionController, SubjectId, TaskQueue, TaskRecord, TaskgateError, WindowKind};

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Admitted; the record is eligible immediately.
    Queued {
        /// The stored record.
        record: TaskRecord,
    },
    /// Rate limited; the record is stored but deferred.
    Rescheduled {
        /// The stored record, `not_before_ms` set.
        record: TaskRecord,
        /// The delay reported by the rejecting window.
        delay_ms: u64,
        /// The rejecting window.
        window: WindowKind,
    },
}

impl SubmitOutcome {
    /// The stored record.
    pub fn record(&self) -> &TaskRecord {
        match self {
            SubmitOutcome::Queued { record } => record,
            SubmitOutcome::Rescheduled { record, .. } => record,
        }
    }
}

/// Routes each submission through the admission controller into the queue.
///
/// Rate-limited work is never dropped, only deferred by the rejecting
/// window's delay. If admission itself fails nothing is enqueued.
pub struct IntakeService {
    admission: Arc<DualAdmissionController>,
    queue: Arc<dyn TaskQueue>,
}

impl IntakeService {
    /// Create an intake over `admission` and `queue`.
    pub fn new(admission: Arc<DualAdmissionController>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { admission, queue }
    }

    /// The queue submissions land in.
    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Admit and enqueue one task for `subject`.
    ///
    /// # Errors
    ///
    /// - [`TaskgateError::AdmissionUnavailable`]: the window store failed; nothing was enqueued
    /// - [`TaskgateError::QueueUnavailable`]: the enqueue failed
    pub async fn submit(
        &self,
        subject: SubjectId,
        payload: serde_json::Value,
    ) -> Result<SubmitOutcome, TaskgateError> {
        let admission = self.admission.admit(&subject).await?;
        let record = TaskRecord::new(subject, payload);

        let Some((window, delay_ms)) = admission.rejection() else {
            let record = self.queue.enqueue(record).await?;
            tracing::info!(task_id = %record.id, subject = %record.subject_id, "task.queued");

            return Ok(SubmitOutcome::Queued { record });
        };

        let record = self.queue.enqueue_after(record, delay_ms).await?;
        tracing::info!(
            task_id = %record.id,
            subject = %record.subject_id,
            window = %window,
            delay_ms,
            "task.rescheduled"
        );

        Ok(SubmitOutcome::Rescheduled {
            record,
            delay_ms,
            window,
        })
    } // end method submit
}
