//! Durable delayed work queue.
//!
//! A record moves through three sets:
//!
//! - **delayed**: `not_before_ms` is in the future; invisible to consumers
//! - **ready**: eligible, served by earliest `enqueued_at_ms`, then by `seq`
//! - **inflight**: claimed under a lease; removed by [`TaskQueue::ack`] or returned by
//!   [`TaskQueue::release`]
//!
//! A lease that is never acknowledged expires and the record goes back to
//! ready on the next claim (at-least-once). The stale holder can no longer
//! ack or release it: every transition checks the lease token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SubjectId, TaskgateError};

/// A unit of pending work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Unique task id.
    pub id: Uuid,
    /// Submitting subject.
    pub subject_id: SubjectId,
    /// When the queue accepted the record. Stamped by the queue.
    pub enqueued_at_ms: u64,
    /// Per-queue enqueue sequence. Breaks ties between records accepted in
    /// the same millisecond. Stamped by the queue.
    #[serde(default)]
    pub seq: u64,
    /// Earliest instant the record may be handed to a consumer.
    pub not_before_ms: Option<u64>,
    /// Opaque task body.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskRecord {
    /// A fresh record for `subject_id`; timestamps are filled in on enqueue.
    pub fn new(subject_id: SubjectId, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            enqueued_at_ms: 0,
            seq: 0,
            not_before_ms: None,
            payload,
        }
    }

    /// Whether the record may be handed out at `now_ms`.
    pub fn is_eligible_at(&self, now_ms: u64) -> bool {
        self.not_before_ms.is_none_or(|not_before| not_before <= now_ms)
    }
}

/// A record held under a lease by one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    /// The claimed record.
    pub record: TaskRecord,
    /// Token proving ownership of the lease.
    pub lease_token: Uuid,
    /// When the lease lapses and the record becomes reclaimable.
    pub lease_expires_at_ms: u64,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
}

/// Point-in-time record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Eligible and waiting.
    pub ready: u64,
    /// Waiting for `not_before_ms`.
    pub delayed: u64,
    /// Currently leased.
    pub inflight: u64,
}

impl QueueStats {
    /// Total records owned by the queue.
    pub fn total(&self) -> u64 {
        self.ready + self.delayed + self.inflight
    }
}

/// Durable store of pending [`TaskRecord`]s.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Store `record` as immediately eligible. Returns the stamped record.
    async fn enqueue(&self, record: TaskRecord) -> Result<TaskRecord, TaskgateError>;

    /// Store `record` with `not_before = now + delay_ms`. Returns the stamped
    /// record.
    async fn enqueue_after(
        &self,
        record: TaskRecord,
        delay_ms: u64,
    ) -> Result<TaskRecord, TaskgateError>;

    /// Claim the earliest-enqueued eligible record under a lease of `lease_ms`.
    /// Records enqueued in the same millisecond are served in `seq` order.
    ///
    /// Expired leases are returned to ready and due delayed records are
    /// promoted in the same atomic step. Returns `None` when nothing is
    /// eligible.
    async fn claim(&self, lease_ms: u64) -> Result<Option<ClaimedTask>, TaskgateError>;

    /// Remove a claimed record. Returns `false` if the lease was lost.
    async fn ack(&self, claim: &ClaimedTask) -> Result<bool, TaskgateError>;

    /// Return a claimed record to pending, eligible again after `delay_ms`.
    /// Returns `false` if the lease was lost.
    async fn release(&self, claim: &ClaimedTask, delay_ms: u64) -> Result<bool, TaskgateError>;

    /// Look up a record the queue still owns.
    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskgateError>;

    /// Current set sizes.
    async fn stats(&self) -> Result<QueueStats, TaskgateError>;
}
