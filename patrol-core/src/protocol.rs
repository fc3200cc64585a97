//! Bridge envelope types
//!
//! Every frame on the transport is a JSON object discriminated by `type`.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::broker::{BrokerConfig, BrokerMessage};
use crate::error::BridgeError;

/// Text of the `welcome` envelope
pub const WELCOME_MESSAGE: &str = "WebSocket connection established";

/// `publish_result.payload` when the broker accepted the publish
pub const PUBLISH_SUCCESS: &str = "success";

/// Messages sent from client to bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open (or replace) the broker connection
    Connect {
        #[serde(default)]
        config: Option<BrokerConfig>,
    },

    /// Drop the broker connection, keeping the session
    Disconnect,

    /// Subscribe to a topic filter
    Subscribe {
        topic: String,
        #[serde(default)]
        qos: i64,
    },

    /// Remove a topic filter
    Unsubscribe { topic: String },

    /// Publish a payload
    Publish {
        topic: String,
        #[serde(default)]
        payload: String,
        #[serde(default)]
        qos: i64,
        #[serde(default)]
        retain: bool,
    },
}

impl ClientMessage {
    /// Discriminators this bridge understands
    pub const TYPES: [&'static str; 5] =
        ["connect", "disconnect", "subscribe", "unsubscribe", "publish"];

    /// Decode one inbound frame
    ///
    /// An unrecognized or missing `type` is reported as
    /// [`BridgeError::UnknownMessageType`]; anything else that fails to parse
    /// is a [`BridgeError::SerializationError`].
    pub fn decode(text: &str) -> Result<Self, BridgeError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        if !Self::TYPES.contains(&kind) {
            return Err(BridgeError::UnknownMessageType(kind.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }

    /// The `type` discriminator of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Connect { .. } => "connect",
            ClientMessage::Disconnect => "disconnect",
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::Publish { .. } => "publish",
        }
    }
}

/// Messages sent from bridge to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection
    Welcome {
        message: String,
        #[serde(rename = "clientId")]
        client_id: String,
        timestamp: String,
    },

    /// Broker connection established
    MqttConnected,

    /// Broker connection lost without the client asking
    MqttDisconnected,

    /// Broker connection attempt failed
    MqttError { payload: String },

    /// Subscribe accepted
    SubscriptionSuccess { topic: String, qos: u8 },

    /// Broker refused a subscribe; carries the topic so replies can be matched
    SubscribeResult { topic: String, payload: String },

    /// Outcome of a publish: `success` or the failure text
    PublishResult { topic: String, payload: String },

    /// Message delivered by the broker
    MqttMessage {
        topic: String,
        payload: String,
        qos: u8,
        retain: bool,
    },

    /// Generic failure
    Error { payload: String },
}

impl ServerMessage {
    /// Welcome envelope for a freshly registered session
    pub fn welcome(client_id: impl Into<String>) -> Self {
        ServerMessage::Welcome {
            message: WELCOME_MESSAGE.to_string(),
            client_id: client_id.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Generic error envelope carrying an error's text
    pub fn error(error: &impl std::fmt::Display) -> Self {
        ServerMessage::Error {
            payload: error.to_string(),
        }
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<String, BridgeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The `type` discriminator of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::MqttConnected => "mqtt_connected",
            ServerMessage::MqttDisconnected => "mqtt_disconnected",
            ServerMessage::MqttError { .. } => "mqtt_error",
            ServerMessage::SubscriptionSuccess { .. } => "subscription_success",
            ServerMessage::SubscribeResult { .. } => "subscribe_result",
            ServerMessage::PublishResult { .. } => "publish_result",
            ServerMessage::MqttMessage { .. } => "mqtt_message",
            ServerMessage::Error { .. } => "error",
        }
    }
}

impl From<BrokerMessage> for ServerMessage {
    fn from(message: BrokerMessage) -> Self {
        ServerMessage::MqttMessage {
            topic: message.topic,
            payload: message.payload,
            qos: message.qos.as_u8(),
            retain: message.retain,
        }
    }
}
