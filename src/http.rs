use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use crate::{IntakeService, SubjectId, SubmitOutcome, TaskgateError};

/// HTTP API service builder.
pub struct HttpApi {
    intake: Arc<IntakeService>,
}

impl HttpApi {
    /// Create a new HTTP API over `intake`.
    pub fn new(intake: Arc<IntakeService>) -> Self {
        Self { intake }
    }

    /// Build the axum router.
    ///
    /// Routes:
    /// - POST /task - Submit a task for a subject
    pub fn router(self) -> Router {
        Router::new()
            .route("/task", post(submit_task))
            .with_state(self.intake)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body is missing something.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Admission, queue or validation failure.
    #[error(transparent)]
    Taskgate(#[from] TaskgateError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidRequest(_) | ApiError::Taskgate(TaskgateError::InvalidSubject(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Taskgate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "task submission failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitTaskRequest {
    #[serde(default, alias = "user_id")]
    subject_id: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitTaskResponse {
    status: &'static str,
    task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    window: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /task
async fn submit_task(
    State(intake): State<Arc<IntakeService>>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Response, ApiError> {
    let subject = req
        .subject_id
        .ok_or_else(|| ApiError::InvalidRequest("subjectId is required".to_string()))?;
    let subject = SubjectId::try_from(subject)?;

    match intake.submit(subject, req.payload).await? {
        SubmitOutcome::Queued { record } => {
            let response = SubmitTaskResponse {
                status: "queued",
                task_id: record.id.to_string(),
                retry_after_ms: None,
                window: None,
            };

            Ok((StatusCode::OK, Json(response)).into_response())
        }
        SubmitOutcome::Rescheduled {
            record,
            delay_ms,
            window,
        } => {
            let response = SubmitTaskResponse {
                status: "rescheduled",
                task_id: record.id.to_string(),
                retry_after_ms: Some(delay_ms),
                window: Some(window.to_string()),
            };
            let retry_after_secs = delay_ms.div_ceil(1000).to_string();

            Ok((
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_secs)],
                Json(response),
            )
                .into_response())
        }
    }
}
