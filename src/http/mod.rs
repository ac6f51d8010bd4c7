//! HTTP API server for the host front-end
//!
//! This module provides a REST API for the voice concierge toggle:
//! - POST /concierge/toggle - Start if idle, stop if active
//! - POST /concierge/start - Start a voice session
//! - POST /concierge/stop - Stop the voice session
//! - GET /concierge/status - Current status text and flags
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
