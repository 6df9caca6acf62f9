use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    ClaimedTask, ConsumeDecision, DualAdmissionController, IntakeService, ManualClock,
    QueueStats, RateWindow, RateWindowStore, Stores, SubjectId, SubmitOutcome, TaskQueue,
    TaskRecord, TaskgateError, WindowKind,
};

use super::runtime;

fn subject(s: &str) -> SubjectId {
    SubjectId::try_from(s).unwrap()
}

fn intake(windows: Arc<dyn RateWindowStore>, queue: Arc<dyn TaskQueue>) -> IntakeService {
    let admission = DualAdmissionController::new(
        windows,
        RateWindow::from_raw("burstLimiter", 1, 1000, 60_000).unwrap(),
        RateWindow::from_raw("sustainedLimiter", 3, 60_000, 0).unwrap(),
    );

    IntakeService::new(Arc::new(admission), queue)
}

struct DownStore;

#[async_trait]
impl RateWindowStore for DownStore {
    async fn consume(
        &self,
        _window: &RateWindow,
        _subject: &SubjectId,
    ) -> Result<ConsumeDecision, TaskgateError> {
        Err(TaskgateError::StoreUnavailable("connection refused".into()))
    }
}

struct DownQueue;

#[async_trait]
impl TaskQueue for DownQueue {
    async fn enqueue(&self, _record: TaskRecord) -> Result<TaskRecord, TaskgateError> {
        Err(TaskgateError::QueueUnavailable("connection refused".into()))
    }

    async fn enqueue_after(
        &self,
        _record: TaskRecord,
        _delay_ms: u64,
    ) -> Result<TaskRecord, TaskgateError> {
        Err(TaskgateError::QueueUnavailable("connection refused".into()))
    }

    async fn claim(&self, _lease_ms: u64) -> Result<Option<ClaimedTask>, TaskgateError> {
        Ok(None)
    }

    async fn ack(&self, _claim: &ClaimedTask) -> Result<bool, TaskgateError> {
        Ok(false)
    }

    async fn release(&self, _claim: &ClaimedTask, _delay_ms: u64) -> Result<bool, TaskgateError> {
        Ok(false)
    }

    async fn get(&self, _id: Uuid) -> Result<Option<TaskRecord>, TaskgateError> {
        Ok(None)
    }

    async fn stats(&self) -> Result<QueueStats, TaskgateError> {
        Ok(QueueStats::default())
    }
}

#[test]
fn second_submission_in_burst_window_is_rescheduled() {
    runtime::block_on(async {
        let clock = Arc::new(ManualClock::new(10_000));
        let stores = Stores::local_with_clock(clock.clone());
        let intake = intake(stores.windows.clone(), stores.queue.clone());

        let first = intake
            .submit(subject("u1"), serde_json::Value::Null)
            .await
            .unwrap();
        assert!(matches!(first, SubmitOutcome::Queued { .. }));

        clock.advance(500);
        let second = intake
            .submit(subject("u1"), serde_json::Value::Null)
            .await
            .unwrap();

        match &second {
            SubmitOutcome::Rescheduled {
                record,
                delay_ms,
                window,
            } => {
                assert_eq!(*delay_ms, 60_000);
                assert_eq!(*window, WindowKind::Burst);
                assert_eq!(record.not_before_ms, Some(10_500 + 60_000));
            }
            other => panic!("expected reschedule, got {other:?}"),
        }

        let stats = stores.queue.stats().await.unwrap();
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.delayed, 1);

        // both are eventually delivered, the rescheduled one after its delay
        let claim = stores.queue.claim(30_000).await.unwrap().unwrap();
        assert_eq!(claim.record.id, first.record().id);
        assert!(stores.queue.claim(30_000).await.unwrap().is_none());

        clock.advance(60_000);
        let claim = stores.queue.claim(30_000).await.unwrap().unwrap();
        assert_eq!(claim.record.id, second.record().id);
    });
}

#[test]
fn fourth_spaced_submission_hits_sustained_window() {
    runtime::block_on(async {
        let clock = Arc::new(ManualClock::new(0));
        let stores = Stores::local_with_clock(clock.clone());
        let intake = intake(stores.windows.clone(), stores.queue.clone());

        for _ in 0..3 {
            let outcome = intake
                .submit(subject("u1"), serde_json::Value::Null)
                .await
                .unwrap();
            assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
            clock.advance(2_000);
        }

        let fourth = intake
            .submit(subject("u1"), serde_json::json!({ "job": 4 }))
            .await
            .unwrap();

        match fourth {
            SubmitOutcome::Rescheduled {
                record,
                delay_ms,
                window,
            } => {
                assert_eq!(window, WindowKind::Sustained);
                assert_eq!(delay_ms, 54_000);
                assert_eq!(record.payload["job"], 4);
            }
            other => panic!("expected reschedule, got {other:?}"),
        }
    });
}

#[test]
fn other_subjects_are_unaffected() {
    runtime::block_on(async {
        let clock = Arc::new(ManualClock::new(0));
        let stores = Stores::local_with_clock(clock);
        let intake = intake(stores.windows.clone(), stores.queue.clone());

        intake
            .submit(subject("u1"), serde_json::Value::Null)
            .await
            .unwrap();
        let other = intake
            .submit(subject("u2"), serde_json::Value::Null)
            .await
            .unwrap();

        assert!(matches!(other, SubmitOutcome::Queued { .. }));
    });
}

#[test]
fn store_outage_enqueues_nothing() {
    runtime::block_on(async {
        let stores = Stores::local();
        let intake = intake(Arc::new(DownStore), stores.queue.clone());

        let err = intake
            .submit(subject("u1"), serde_json::Value::Null)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskgateError::AdmissionUnavailable { .. }));
        assert_eq!(stores.queue.stats().await.unwrap().total(), 0);
    });
}

#[test]
fn queue_outage_fails_accepted_and_rescheduled_submissions() {
    runtime::block_on(async {
        let clock = Arc::new(ManualClock::new(0));
        let stores = Stores::local_with_clock(clock.clone());
        let intake = intake(stores.windows.clone(), Arc::new(DownQueue));

        // admitted, then enqueue fails
        let err = intake
            .submit(subject("u1"), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskgateError::QueueUnavailable(_)));
        assert!(err.is_unavailable());

        // burst-rejected, then the delayed enqueue fails
        clock.advance(200);
        let err = intake
            .submit(subject("u1"), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskgateError::QueueUnavailable(_)));
    });
}
