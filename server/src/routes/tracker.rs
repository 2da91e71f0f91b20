//! Experiment tracking switch

use std::path::PathBuf;

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use super::{blocking, ApiResult, StatusMessage};
use crate::state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct EnableTrackingRequest {
    /// Defaults to the configured tracker directory
    pub root_dir: Option<PathBuf>,
}

/// POST /tracker/enable - Record later training runs as JSON lines
pub async fn enable_tracking(
    State(state): State<SharedState>,
    Json(request): Json<EnableTrackingRequest>,
) -> ApiResult<Json<StatusMessage>> {
    let root = request
        .root_dir
        .unwrap_or_else(|| state.config.tracker_dir.clone());

    let dir = root.clone();
    blocking(move || std::fs::create_dir_all(&dir).map_err(Into::into)).await?;

    info!("Experiment tracking enabled at {:?}", root);
    let message = format!("Experiment tracking enabled at {}", root.display());
    state.enable_tracking(root);
    Ok(Json(StatusMessage::ok(message)))
}
