//! Shared test utilities for patrol-server integration tests

pub mod client;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use patrol_core::{BridgeSettings, MockBrokerClient};
use patrol_server::{AppState, PatrolServer, ServerConfig};
use tokio::net::TcpListener;

/// Creates a test server backed by a mock broker
#[allow(dead_code)]
pub async fn create_test_server() -> (Arc<AppState>, MockBrokerClient, SocketAddr) {
    let broker = MockBrokerClient::new();
    let settings = BridgeSettings::new(Duration::from_secs(2), Duration::from_millis(50));
    let state = Arc::new(AppState::with_broker(Arc::new(broker.clone()), settings));

    let server = PatrolServer::with_state(ServerConfig::new("127.0.0.1", 0), Arc::clone(&state));
    let addr = spawn_server(server).await;

    (state, broker, addr)
}

/// Spawns server in background task, returns bound address
async fn spawn_server(server: PatrolServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = server.run_with_listener(listener).await;
    });

    // Brief delay to ensure server is accepting connections
    tokio::time::sleep(Duration::from_millis(10)).await;

    addr
}

/// Polls until `check` holds or a second has passed
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
