//! patrol-core: WebSocket-to-MQTT bridge for the patrol fleet backend
//!
//! This crate holds everything the bridge needs except the HTTP server:
//!
//! - **Broker** - [`BrokerClient`] and [`BrokerHandle`] traits, with the
//!   rumqttc-backed [`MqttBrokerClient`] and the scriptable [`MockBrokerClient`]
//! - **Transport** - [`TransportSink`] / [`TransportSource`] halves of a
//!   framed duplex connection, plus an in-memory pair for tests
//! - **Sessions** - [`Session`] state machine and the [`SessionRegistry`]
//! - **Translator** - [`serve_connection`] runs one connection end to end
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use patrol_core::{BridgeSettings, MqttBrokerClient, SessionRegistry, serve_connection};
//! use patrol_core::transport::memory;
//!
//! async fn example() {
//!     let registry = Arc::new(SessionRegistry::new(
//!         Arc::new(MqttBrokerClient::new()),
//!         BridgeSettings::default(),
//!     ));
//!
//!     let (sink, source, _peer) = memory::channel();
//!     serve_connection(registry, Box::new(sink), Box::new(source)).await;
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 SessionRegistry                  │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │                  Session                   │  │
//! │  │  ┌───────────────┐  ┌───────────────────┐  │  │
//! │  │  │ TransportSink │  │   BrokerHandle    │  │  │
//! │  │  │  (WebSocket)  │  │     (rumqttc)     │  │  │
//! │  │  └───────────────┘  └───────────────────┘  │  │
//! │  └────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod broker;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export key types for convenience
pub use bridge::{dispatch, serve_connection};
pub use broker::{
    BrokerClient, BrokerConfig, BrokerEvent, BrokerHandle, BrokerMessage, MockBrokerClient,
    MqttBrokerClient, Qos,
};
pub use config::BridgeSettings;
pub use error::{BridgeError, BridgeResult, BrokerError, TransportError};
pub use protocol::{ClientMessage, ServerMessage};
pub use session::{Session, SessionRegistry, SessionSnapshot, SessionState};
pub use transport::{TransportSink, TransportSource};
