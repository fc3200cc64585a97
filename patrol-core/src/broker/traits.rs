//! Broker abstraction: typed connection parameters, delivery events and the
//! client/handle traits the session drives.
//!
//! The bridge never speaks the broker wire protocol itself. A [`BrokerClient`]
//! produces at most one live [`BrokerHandle`] per session; asynchronous
//! deliveries and connection loss flow back through a [`BrokerEventSender`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{BridgeError, BrokerError};

/// Connection parameters for one broker session
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Broker host name or address
    #[serde(default)]
    pub host: String,
    /// Broker TCP port
    #[serde(default)]
    pub port: u16,
    /// Optional username
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password, never serialized back out
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// MQTT client identifier; generated when absent
    #[serde(default)]
    pub client_id: Option<String>,
}

impl BrokerConfig {
    /// Create a config for `host:port` without credentials
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            client_id: None,
        }
    }

    /// Set username and password
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set an explicit client identifier
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Check required fields
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::InvalidConfig("host is required".to_string()));
        }
        if self.port == 0 {
            return Err(BridgeError::InvalidConfig("port is required".to_string()));
        }
        if let Some(id) = &self.client_id
            && id.starts_with(' ')
        {
            return Err(BridgeError::InvalidConfig(
                "clientId must not start with a space".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` as shown in logs and snapshots
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The configured client identifier, or a freshly generated one
    pub fn effective_client_id(&self) -> String {
        match self.client_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("patrol-{}", &Uuid::new_v4().simple().to_string()[..8]),
        }
    }

    /// Credentials, treating empty strings as absent
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        Some((username, self.password.as_deref().unwrap_or("")))
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Delivery guarantee requested for a subscribe or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<i64> for Qos {
    type Error = BridgeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(BridgeError::InvalidQos(other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos.as_u8()
    }
}

/// A message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
    pub retain: bool,
}

/// Asynchronous events raised by a live broker handle
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// A message arrived on a subscribed topic
    Message(BrokerMessage),
    /// The broker connection dropped without the bridge asking for it
    ConnectionLost(String),
}

/// Channel a broker handle reports its events on
pub type BrokerEventSender = mpsc::UnboundedSender<BrokerEvent>;

/// Receiving half of [`BrokerEventSender`]
pub type BrokerEventReceiver = mpsc::UnboundedReceiver<BrokerEvent>;

/// Factory for broker connections
///
/// Enables dependency injection of broker implementations.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establish a connection. Events for the returned handle are sent on `events`.
    ///
    /// Callers bound this with their own timeout; dropping the future must
    /// abandon the attempt.
    async fn connect(
        &self,
        config: &BrokerConfig,
        events: BrokerEventSender,
    ) -> Result<Box<dyn BrokerHandle>, BrokerError>;
}

/// One established broker connection
#[async_trait]
pub trait BrokerHandle: Send + Sync {
    /// Register interest in a topic filter
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), BrokerError>;

    /// Remove a topic filter registration
    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Publish a payload
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), BrokerError>;

    /// Graceful disconnect, returning within roughly `linger`
    ///
    /// Must not raise a `ConnectionLost` event for this disconnect.
    async fn disconnect(&self, linger: Duration);
}
