//! Shared application state for the patrol server

use std::sync::Arc;

use chrono::{DateTime, Utc};
use patrol_core::{BridgeSettings, BrokerClient, MqttBrokerClient, SessionRegistry};

/// Shared application state accessible by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Registry of bridge sessions, one per WebSocket
    pub registry: Arc<SessionRegistry>,
    /// Broker client used by sessions and the test-connection endpoint
    pub broker: Arc<dyn BrokerClient>,
    /// Connect timeout and disconnect linger
    pub settings: BridgeSettings,
    /// When the server started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new AppState backed by a real MQTT client
    pub fn new(settings: BridgeSettings) -> Self {
        Self::with_broker(Arc::new(MqttBrokerClient::new()), settings)
    }

    /// Create AppState with a custom broker client (for testing)
    pub fn with_broker(broker: Arc<dyn BrokerClient>, settings: BridgeSettings) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(Arc::clone(&broker), settings)),
            broker,
            settings,
            started_at: Utc::now(),
        }
    }

    /// Returns how long the server has been running
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(BridgeSettings::default())
    }
}
