//! Axum server and routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use job_types::{JobApiError, JobControl, JobId, JobStatusQuery, JobStatusSnapshot, SubjectId};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub control: Arc<dyn JobControl>,
    pub status: Arc<dyn JobStatusQuery>,
}

impl AppState {
    /// Both roles served by one backend (e.g. `InMemoryJobService`).
    pub fn new<S>(service: Arc<S>) -> Self
    where
        S: JobControl + JobStatusQuery + 'static,
    {
        Self {
            control: service.clone(),
            status: service,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/subjects/:subject_id/job", post(handle_start).get(handle_subject_status))
        .route("/subjects/:subject_id/job/cancel", post(handle_cancel))
        .route("/jobs/:job_id", get(handle_job_status))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error body: `{"code": .., "message": ..}`.
struct ApiError(JobApiError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            JobApiError::NotFound(_) => StatusCode::NOT_FOUND,
            JobApiError::Status { code, .. } => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            JobApiError::Transport(_) | JobApiError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "code": status.as_u16(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<JobApiError> for ApiError {
    fn from(e: JobApiError) -> Self {
        Self(e)
    }
}

async fn handle_start(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> Result<Json<JobStatusSnapshot>, ApiError> {
    let subject_id = SubjectId::new(subject_id);
    let snapshot = state.control.start_job(&subject_id).await?;
    tracing::info!(subject_id = %subject_id, job_id = ?snapshot.job_id, state = %snapshot.state, "start requested");
    Ok(Json(snapshot))
}

async fn handle_subject_status(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> Result<Json<JobStatusSnapshot>, ApiError> {
    let snapshot = state
        .status
        .get_job_status_for_subject(&SubjectId::new(subject_id))
        .await?;
    Ok(Json(snapshot))
}

async fn handle_cancel(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let subject_id = SubjectId::new(subject_id);
    state.control.cancel_job(&subject_id).await?;
    tracing::info!(subject_id = %subject_id, "cancel requested");
    Ok(StatusCode::ACCEPTED)
}

async fn handle_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusSnapshot>, ApiError> {
    let snapshot = state.status.get_job_status(&JobId::new(job_id)).await?;
    Ok(Json(snapshot))
}

async fn handle_health() -> &'static str {
    "ok"
}
