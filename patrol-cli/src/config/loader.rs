use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::types::{
    BridgeConfig, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DISCONNECT_LINGER_MS, DEFAULT_HOST,
    DEFAULT_KEEP_ALIVE_SECS, DEFAULT_PORT, PatrolConfig, RawBridgeConfig, RawPatrolConfig,
    RawServerConfig, ServerConfig,
};

/// Project config file looked up in the working directory
pub const PROJECT_CONFIG_FILE: &str = "patrol.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (file + environment)
    ///
    /// `explicit` must exist when given; otherwise `patrol.toml` in the
    /// working directory is used if present.
    pub fn load(explicit: Option<&Path>) -> Result<PatrolConfig> {
        let mut raw = RawPatrolConfig::default();

        // Layer 1: Config file
        match explicit {
            Some(path) => raw = Self::merge_raw(raw, Self::read_raw(path)?),
            None => {
                let project_path = Self::project_config_path();
                if project_path.exists() {
                    raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
                }
            }
        }

        // Layer 2: Environment
        raw = Self::apply_env(raw, |key| std::env::var(key).ok())?;

        Ok(Self::finalize(raw))
    }

    /// Get project config path
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(PROJECT_CONFIG_FILE)
    }

    /// Load a single config file with defaults applied
    pub fn load_from_path(path: &Path) -> Result<PatrolConfig> {
        Ok(Self::finalize(Self::read_raw(path)?))
    }

    fn read_raw(path: &Path) -> Result<RawPatrolConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Apply `PORT`, `HOST` and `ENV` overrides
    fn apply_env<F>(mut raw: RawPatrolConfig, lookup: F) -> Result<RawPatrolConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").filter(|v| !v.is_empty()) {
            let port = port
                .parse()
                .with_context(|| format!("invalid PORT value: {}", port))?;
            raw.server.port = Some(port);
        }
        if let Some(host) = lookup("HOST").filter(|v| !v.is_empty()) {
            raw.server.host = Some(host);
        }
        if let Some(env) = lookup("ENV").filter(|v| !v.is_empty()) {
            let env = env.parse().map_err(anyhow::Error::msg)?;
            raw.server.environment = Some(env);
        }
        Ok(raw)
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawPatrolConfig, overlay: RawPatrolConfig) -> RawPatrolConfig {
        RawPatrolConfig {
            server: RawServerConfig {
                host: overlay.server.host.or(base.server.host),
                port: overlay.server.port.or(base.server.port),
                environment: overlay.server.environment.or(base.server.environment),
            },
            bridge: RawBridgeConfig {
                connect_timeout_ms: overlay
                    .bridge
                    .connect_timeout_ms
                    .or(base.bridge.connect_timeout_ms),
                disconnect_linger_ms: overlay
                    .bridge
                    .disconnect_linger_ms
                    .or(base.bridge.disconnect_linger_ms),
                keep_alive_secs: overlay
                    .bridge
                    .keep_alive_secs
                    .or(base.bridge.keep_alive_secs),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawPatrolConfig) -> PatrolConfig {
        PatrolConfig {
            server: ServerConfig {
                host: raw.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: raw.server.port.unwrap_or(DEFAULT_PORT),
                environment: raw.server.environment.unwrap_or_default(),
            },
            bridge: BridgeConfig {
                connect_timeout_ms: raw
                    .bridge
                    .connect_timeout_ms
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
                disconnect_linger_ms: raw
                    .bridge
                    .disconnect_linger_ms
                    .unwrap_or(DEFAULT_DISCONNECT_LINGER_MS),
                keep_alive_secs: raw.bridge.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            },
        }
    }
}
