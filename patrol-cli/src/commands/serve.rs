//! Patrol serve command for running the bridge server
//!
//! The serve command runs the patrol server which provides:
//! - WebSocket bridge to MQTT brokers at `/ws/mqtt`
//! - HTTP API for health, session listing and broker test connections

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use patrol_core::MqttBrokerClient;
use patrol_server::{AppState, PatrolServer, ServerConfig};
use tracing::info;

use crate::config::PatrolConfig;

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (overrides config and HOST)
    #[arg(long)]
    pub host: Option<String>,
}

impl ServeArgs {
    /// Resolve the bind address, letting flags win over configuration
    pub fn server_config(&self, config: &PatrolConfig) -> ServerConfig {
        ServerConfig::new(
            self.host.clone().unwrap_or_else(|| config.server.host.clone()),
            self.port.unwrap_or(config.server.port),
        )
    }
}

/// Run the serve command
pub async fn run(args: ServeArgs, config: PatrolConfig) -> Result<()> {
    let server_config = args.server_config(&config);
    let settings = config.bridge.settings();
    let broker = MqttBrokerClient::new().with_keep_alive(config.bridge.keep_alive());

    info!(
        environment = %config.server.environment,
        connect_timeout_ms = config.bridge.connect_timeout_ms,
        disconnect_linger_ms = config.bridge.disconnect_linger_ms,
        "Starting patrol server on {}",
        server_config.addr()
    );

    let state = Arc::new(AppState::with_broker(Arc::new(broker), settings));
    let server = PatrolServer::with_state(server_config, state);
    server.run().await.map_err(Into::into)
}
