use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::info;

use super::state::AppState;
use crate::supervisor::RestartError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct RestartResponse {
    pub camera: String,
    pub status: String,
    pub message: String,
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /status
/// Aggregate state snapshot for every camera
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.supervisor.status()))
}

/// GET /cameras/:name/status
/// State snapshot for one camera
pub async fn get_camera_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.supervisor.camera_status(&name) {
        Some(stream_state) => (StatusCode::OK, Json(stream_state)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Camera {} not found", name),
            }),
        )
            .into_response(),
    }
}

/// POST /cameras/:name/restart
/// Wake a camera parked in the failed state
pub async fn restart_camera(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.supervisor.restart_camera(&name) {
        Ok(()) => {
            info!("Operator restart accepted for camera: {}", name);
            (
                StatusCode::OK,
                Json(RestartResponse {
                    camera: name.clone(),
                    status: "restarting".to_string(),
                    message: format!("Restart requested for camera {}", name),
                }),
            )
                .into_response()
        }
        Err(RestartError::UnknownCamera(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Camera {} not found", name),
            }),
        )
            .into_response(),
        Err(err @ RestartError::NotFailed(_)) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}
