//! Bridge timing settings

use std::time::Duration;

/// Default bound on establishing a broker connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a graceful broker disconnect
pub const DEFAULT_DISCONNECT_LINGER: Duration = Duration::from_millis(250);

/// Timing knobs shared by every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// How long a connect attempt may take before it is reported as failed
    pub connect_timeout: Duration,
    /// How long a broker disconnect may linger before the handle is dropped
    pub disconnect_linger: Duration,
}

impl BridgeSettings {
    pub fn new(connect_timeout: Duration, disconnect_linger: Duration) -> Self {
        Self {
            connect_timeout,
            disconnect_linger,
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCONNECT_LINGER)
    }
}
