//! API routes
//!
//! Every failure is answered as `{"status": "Failed", "kind": ..., "message": ...}`
//! with a status code derived from the error kind.

pub mod health;
pub mod models;
pub mod tracker;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use backbone_hub::HubError;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::state::SharedState;

/// Build the API router
pub fn router(state: SharedState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Experiment tracking
        .route("/tracker/enable", post(tracker::enable_tracking))
        // Models
        .route("/models/list", get(models::list_models))
        .route("/models/add", post(models::add_model))
        .route("/models/train", post(models::train_model))
        .route("/models/test", get(models::test_model))
        .route("/models/predict", post(models::predict))
        .route("/models/checkpoint", post(models::save_checkpoint))
        .route("/models/remove", delete(models::remove_model))
        .route("/models/:name/metrics", get(models::model_metrics))
        .with_state(state)
}

/// `{"status": "OK", "message": ...}`
#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    pub message: String,
}

impl StatusMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "OK",
            message: message.into(),
        }
    }
}

/// An error response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }
}

/// HTTP status for each error kind
pub fn status_for(err: &HubError) -> StatusCode {
    match err {
        HubError::NotFound(_) => StatusCode::NOT_FOUND,
        HubError::DuplicateName(_) | HubError::NotInitialized(_) => StatusCode::CONFLICT,
        HubError::CapacityExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
        HubError::UnsupportedBackboneKind(_)
        | HubError::UnsupportedOptimizerKind(_)
        | HubError::DeviceUnavailable(_)
        | HubError::InvalidConfig(_)
        | HubError::Dataset(_) => StatusCode::BAD_REQUEST,
        HubError::TrainingFailed(_)
        | HubError::PredictionFailed(_)
        | HubError::Checkpoint(_)
        | HubError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!("{}", err);
        }
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "Failed",
            "kind": self.kind,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

/// Run a core call on the blocking pool
pub async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> backbone_hub::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("Worker task failed: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                format!("worker task failed: {}", e),
            )
        })?
        .map_err(ApiError::from)
}
