use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Aggregate and per-camera status
        .route("/status", get(handlers::get_status))
        .route("/cameras/:name/status", get(handlers::get_camera_status))
        // Operator restart of a failed camera
        .route("/cameras/:name/restart", post(handlers::restart_camera))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
