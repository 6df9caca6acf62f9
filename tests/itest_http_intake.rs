use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use tower::ServiceExt;

use uuid::Uuid;

use taskgate::{
    ClaimedTask, ConsumeDecision, DualAdmissionController, HttpApi, IntakeService, ManualClock,
    QueueStats, RateWindow, RateWindowStore, Stores, SubjectId, TaskQueue, TaskRecord,
    TaskgateError,
};

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

fn router(windows: Arc<dyn RateWindowStore>, queue: Arc<dyn TaskQueue>) -> Router {
    let admission = DualAdmissionController::new(
        windows,
        RateWindow::from_raw("burstLimiter", 1, 1000, 60_000).unwrap(),
        RateWindow::from_raw("sustainedLimiter", 3, 60_000, 0).unwrap(),
    );
    let intake = IntakeService::new(Arc::new(admission), queue);

    HttpApi::new(Arc::new(intake)).router()
}

fn post_task(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/task")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn queued_then_rescheduled_with_retry_after() {
    let clock = Arc::new(ManualClock::new(0));
    let stores = Stores::local_with_clock(clock.clone());
    let app = router(stores.windows.clone(), stores.queue.clone());

    let response = app
        .clone()
        .oneshot(post_task(r#"{"subjectId":"user-1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "queued");
    assert!(body["taskId"].as_str().is_some());
    assert!(body.get("retryAfterMs").is_none());

    clock.advance(200);
    let response = app
        .oneshot(post_task(r#"{"user_id":"user-1","payload":{"n":2}}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");

    let body = json_body(response).await;
    assert_eq!(body["status"], "rescheduled");
    assert_eq!(body["retryAfterMs"], 60_000);
    assert_eq!(body["window"], "burst");

    let stats = stores.queue.stats().await.unwrap();
    assert_eq!(stats.ready, 1);
    assert_eq!(stats.delayed, 1);
}

#[tokio::test]
async fn missing_or_empty_subject_is_bad_request() {
    let stores = Stores::local();
    let app = router(stores.windows.clone(), stores.queue.clone());

    let response = app.clone().oneshot(post_task("{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].as_str().is_some());

    let response = app
        .oneshot(post_task(r#"{"subjectId":""}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(stores.queue.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn store_outage_is_internal_error() {
    let stores = Stores::local();
    let app = router(Arc::new(DownStore), stores.queue.clone());

    let response = app
        .oneshot(post_task(r#"{"subjectId":"user-1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = json_body(response).await;
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.contains("admission unavailable"))
    );
    assert_eq!(stores.queue.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn queue_outage_is_internal_error() {
    let stores = Stores::local();
    let app = router(stores.windows.clone(), Arc::new(DownQueue));

    let response = app
        .oneshot(post_task(r#"{"subjectId":"user-1"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = json_body(response).await;
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.contains("task queue unavailable"))
    );
}
