//! Error types for patrol-core

use thiserror::Error;

/// Top-level error type for bridge operations
///
/// Every variant is non-fatal to the session that produced it: the
/// translator surfaces it to the originating client as an envelope and
/// keeps reading.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("client not found: {0}")]
    ClientNotFound(String),

    #[error("config is required for connect")]
    ConfigMissing,

    #[error("invalid broker config: {0}")]
    InvalidConfig(String),

    #[error("MQTT client not connected")]
    NotConnected,

    #[error("invalid qos: {0}")]
    InvalidQos(i64),

    #[error("broker connect failed: {0}")]
    BrokerConnectFailure(#[source] BrokerError),

    #[error("{0}")]
    Broker(#[from] BrokerError),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors reported by a broker client or one of its handles
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection timed out after {0}ms")]
    Timeout(u64),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("broker connection closed")]
    Closed,
}

/// Errors from a transport connection
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport io error: {0}")]
    Io(String),
}

/// Result alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
