//! Broker abstraction and implementations

pub mod mock;
pub mod mqtt;
pub mod traits;

pub use mock::{MockBrokerClient, PublishedMessage};
pub use mqtt::MqttBrokerClient;
pub use traits::{
    BrokerClient, BrokerConfig, BrokerEvent, BrokerEventReceiver, BrokerEventSender,
    BrokerHandle, BrokerMessage, Qos,
};
