//! HTTP server module

mod api;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::AppState;
use crate::ws::ws_handler;

pub use api::{ApiResponse, ConnectionTest, HealthResponse, SessionListResponse};

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/mqtt", get(ws_handler))
        .route("/api/health", get(api::health))
        .route("/api/bridge/sessions", get(api::list_sessions))
        .route("/api/mqtt/test", post(api::test_connection))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
