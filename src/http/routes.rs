use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Voice concierge control
        .route("/concierge/toggle", post(handlers::toggle))
        .route("/concierge/start", post(handlers::start))
        .route("/concierge/stop", post(handlers::stop))
        .route("/concierge/status", get(handlers::get_status))
        // The host front-end is served from another origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
