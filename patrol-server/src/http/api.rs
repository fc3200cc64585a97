//! REST API handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use patrol_core::{BrokerConfig, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status of the server
    pub status: String,
    /// Server version
    pub version: String,
    /// Seconds since server started
    pub uptime_seconds: i64,
    /// Number of registered bridge sessions
    pub active_sessions: usize,
}

/// Health check endpoint
///
/// Returns server status, version, uptime, and active session count.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active_sessions = state.registry.len().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        active_sessions,
    })
}

/// Response for listing bridge sessions
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSnapshot>,
}

/// List all bridge sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.registry.snapshots().await,
    })
}

/// Envelope used by the fleet REST API
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// 0 on success, 1 on failure
    pub code: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            code: 0,
            message: message.into(),
            data: Some(data),
        }
    }

    fn failed(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: 1,
            message: message.into(),
            data,
        }
    }
}

/// Result of a broker test connection
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub connected: bool,
}

/// POST /api/mqtt/test - Try a broker config without opening a session
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BrokerConfig>, JsonRejection>,
) -> (StatusCode, Json<ApiResponse<ConnectionTest>>) {
    let config = match body {
        Ok(Json(config)) => config,
        Err(rejection) => {
            warn!("Rejected test connection body: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failed(rejection.body_text(), None)),
            );
        }
    };
    if let Err(e) = config.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failed(e.to_string(), None)),
        );
    }

    let endpoint = config.endpoint();
    let (events, _) = mpsc::unbounded_channel();
    let timeout = state.settings.connect_timeout;
    let attempt = tokio::time::timeout(timeout, state.broker.connect(&config, events)).await;

    match attempt {
        Ok(Ok(handle)) => {
            handle.disconnect(state.settings.disconnect_linger).await;
            info!(%endpoint, "Broker test connection succeeded");
            (
                StatusCode::OK,
                Json(ApiResponse::ok(
                    "connection succeeded",
                    ConnectionTest { connected: true },
                )),
            )
        }
        Ok(Err(e)) => {
            warn!(%endpoint, "Broker test connection failed: {}", e);
            (
                StatusCode::OK,
                Json(ApiResponse::failed(
                    format!("connection failed: {}", e),
                    Some(ConnectionTest { connected: false }),
                )),
            )
        }
        Err(_) => {
            warn!(%endpoint, "Broker test connection timed out");
            (
                StatusCode::OK,
                Json(ApiResponse::failed(
                    format!("connection timed out after {}ms", timeout.as_millis()),
                    Some(ConnectionTest { connected: false }),
                )),
            )
        }
    }
}
