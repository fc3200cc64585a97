use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use patrol_core::BridgeSettings;
use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPatrolConfig {
    #[serde(default)]
    pub server: RawServerConfig,

    #[serde(default)]
    pub bridge: RawBridgeConfig,
}

/// Server config as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub environment: Option<Environment>,
}

/// Bridge timing as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawBridgeConfig {
    pub connect_timeout_ms: Option<u64>,
    pub disconnect_linger_ms: Option<u64>,
    pub keep_alive_secs: Option<u64>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PatrolConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port for the patrol server
    pub port: u16,

    /// Deployment environment; production switches logs to JSON
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            environment: Environment::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Upper bound on a broker connect attempt
    pub connect_timeout_ms: u64,

    /// Upper bound on a graceful broker disconnect
    pub disconnect_linger_ms: u64,

    /// MQTT keep-alive interval
    pub keep_alive_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            disconnect_linger_ms: DEFAULT_DISCONNECT_LINGER_MS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

impl BridgeConfig {
    pub fn settings(&self) -> BridgeSettings {
        BridgeSettings::new(
            Duration::from_millis(self.connect_timeout_ms),
            Duration::from_millis(self.disconnect_linger_ms),
        )
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// Default host for the patrol server
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default port for the patrol server
pub const DEFAULT_PORT: u16 = patrol_server::DEFAULT_PORT;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DISCONNECT_LINGER_MS: u64 = 250;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
