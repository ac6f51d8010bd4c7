use super::state::AppState;
use crate::session::StatusSnapshot;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn snapshot_response(action: &str, result: anyhow::Result<StatusSnapshot>) -> Response {
    match result {
        Ok(snapshot) => {
            info!("Concierge {} -> {}", action, snapshot.status);
            (StatusCode::OK, Json(snapshot)).into_response()
        }
        Err(e) => {
            error!("Concierge {} failed: {:#}", action, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: format!("Concierge unavailable: {}", e),
                }),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /concierge/toggle
/// Start the voice session if idle, stop it otherwise
pub async fn toggle(State(state): State<AppState>) -> impl IntoResponse {
    snapshot_response("toggle", state.concierge.toggle().await)
}

/// POST /concierge/start
pub async fn start(State(state): State<AppState>) -> impl IntoResponse {
    snapshot_response("start", state.concierge.start().await)
}

/// POST /concierge/stop
pub async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    snapshot_response("stop", state.concierge.stop().await)
}

/// GET /concierge/status
/// Latest published status (does not wait for queued commands)
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.concierge.status()))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
