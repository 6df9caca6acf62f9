use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    ClaimedTask, Clock, QueueStats, SystemClock, TaskQueue, TaskRecord, TaskgateError,
};

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at_ms: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    records: HashMap<Uuid, TaskRecord>,
    attempts: HashMap<Uuid, u32>,
    // (enqueued_at_ms, seq, id)
    ready: BTreeSet<(u64, u64, Uuid)>,
    // (not_before_ms, id)
    delayed: BTreeSet<(u64, Uuid)>,
    inflight: HashMap<Uuid, Lease>,
    // (expires_at_ms, id)
    lease_expiry: BTreeSet<(u64, Uuid)>,
}

fn ready_entry(record: &TaskRecord) -> (u64, u64, Uuid) {
    (record.enqueued_at_ms, record.seq, record.id)
}

impl QueueState {
    fn push_pending(&mut self, record: &TaskRecord, now_ms: u64) {
        match record.not_before_ms {
            Some(not_before_ms) if !record.is_eligible_at(now_ms) => {
                self.delayed.insert((not_before_ms, record.id));
            }
            _ => {
                self.ready.insert(ready_entry(record));
            }
        }
    }

    fn reclaim_expired(&mut self, now_ms: u64) {
        while let Some(&(expires_at_ms, id)) = self.lease_expiry.first()
            && expires_at_ms <= now_ms
        {
            self.lease_expiry.pop_first();
            self.inflight.remove(&id);

            if let Some(record) = self.records.get(&id) {
                tracing::warn!(task_id = %id, "lease expired, record returned to ready");
                self.ready.insert(ready_entry(record));
            }
        }
    }

    fn promote_due(&mut self, now_ms: u64) {
        while let Some(&(not_before_ms, id)) = self.delayed.first()
            && not_before_ms <= now_ms
        {
            self.delayed.pop_first();

            if let Some(record) = self.records.get(&id) {
                self.ready.insert(ready_entry(record));
            }
        }
    }

    fn take_lease(&mut self, claim: &ClaimedTask) -> Option<Lease> {
        let id = claim.record.id;

        match self.inflight.get(&id) {
            Some(lease) if lease.token == claim.lease_token => {
                let lease = *lease;
                self.inflight.remove(&id);
                self.lease_expiry.remove(&(lease.expires_at_ms, id));
                Some(lease)
            }
            _ => None,
        }
    }
}

/// In-process [`TaskQueue`].
///
/// All state sits behind one mutex that is held only for the duration of a
/// single transition, never while a task executes. Ready records are served
/// by `(enqueued_at_ms, seq)`, so records accepted in the same millisecond
/// come out in arrival order. Records do not survive a
/// restart; the Redis queue is the durable backend.
#[derive(Debug)]
pub struct LocalTaskQueue {
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

impl Default for LocalTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTaskQueue {
    /// Create a queue on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a queue on a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(QueueState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, QueueState>, TaskgateError> {
        self.state
            .lock()
            .map_err(|_| TaskgateError::QueueUnavailable("local queue lock poisoned".to_string()))
    }

    fn insert(
        &self,
        mut record: TaskRecord,
        delay_ms: Option<u64>,
    ) -> Result<TaskRecord, TaskgateError> {
        let mut state = self.state()?;
        let now_ms = self.clock.now_ms();

        state.next_seq += 1;
        record.seq = state.next_seq;
        record.enqueued_at_ms = now_ms;
        record.not_before_ms = delay_ms.map(|delay_ms| now_ms.saturating_add(delay_ms));

        state.push_pending(&record, now_ms);
        state.records.insert(record.id, record.clone());

        Ok(record)
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, record: TaskRecord) -> Result<TaskRecord, TaskgateError> {
        self.insert(record, None)
    }

    async fn enqueue_after(
        &self,
        record: TaskRecord,
        delay_ms: u64,
    ) -> Result<TaskRecord, TaskgateError> {
        self.insert(record, Some(delay_ms))
    }

    async fn claim(&self, lease_ms: u64) -> Result<Option<ClaimedTask>, TaskgateError> {
        let now_ms = self.clock.now_ms();
        let mut state = self.state()?;

        state.reclaim_expired(now_ms);
        state.promote_due(now_ms);

        let Some((_, _, id)) = state.ready.pop_first() else {
            return Ok(None);
        };

        let Some(record) = state.records.get(&id).cloned() else {
            return Err(TaskgateError::QueueUnavailable(format!(
                "ready entry {id} has no record"
            )));
        };

        let attempt = {
            let attempts = state.attempts.entry(id).or_insert(0);
            *attempts = attempts.saturating_add(1);
            *attempts
        };

        let lease = Lease {
            token: Uuid::new_v4(),
            expires_at_ms: now_ms.saturating_add(lease_ms),
        };
        state.inflight.insert(id, lease);
        state.lease_expiry.insert((lease.expires_at_ms, id));

        Ok(Some(ClaimedTask {
            record,
            lease_token: lease.token,
            lease_expires_at_ms: lease.expires_at_ms,
            attempt,
        }))
    } // end method claim

    async fn ack(&self, claim: &ClaimedTask) -> Result<bool, TaskgateError> {
        let mut state = self.state()?;

        if state.take_lease(claim).is_none() {
            return Ok(false);
        }

        let id = claim.record.id;
        state.records.remove(&id);
        state.attempts.remove(&id);

        Ok(true)
    }

    async fn release(&self, claim: &ClaimedTask, delay_ms: u64) -> Result<bool, TaskgateError> {
        let now_ms = self.clock.now_ms();
        let mut state = self.state()?;

        if state.take_lease(claim).is_none() {
            return Ok(false);
        }

        let Some(record) = state.records.get_mut(&claim.record.id) else {
            return Ok(false);
        };
        record.not_before_ms = Some(now_ms.saturating_add(delay_ms));

        let record = record.clone();
        state.push_pending(&record, now_ms);

        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskgateError> {
        Ok(self.state()?.records.get(&id).cloned())
    }

    async fn stats(&self) -> Result<QueueStats, TaskgateError> {
        let state = self.state()?;

        Ok(QueueStats {
            ready: state.ready.len() as u64,
            delayed: state.delayed.len() as u64,
            inflight: state.inflight.len() as u64,
        })
    }
}
