//! MQTT broker client built on rumqttc
//!
//! Each handle owns one rumqttc event loop running on its own task. The loop
//! is never polled again after an error, so a dropped connection stays
//! dropped until the client asks for a new one.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::traits::{
    BrokerClient, BrokerConfig, BrokerEvent, BrokerEventSender, BrokerHandle, BrokerMessage, Qos,
};
use crate::error::BrokerError;

/// Default keep-alive interval
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Capacity of the request queue between an `AsyncClient` and its event loop
const REQUEST_CAPACITY: usize = 64;

/// Broker client producing rumqttc-backed handles
#[derive(Debug, Clone)]
pub struct MqttBrokerClient {
    keep_alive: Duration,
}

impl MqttBrokerClient {
    pub fn new() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Override the keep-alive interval (rumqttc rejects sub-second values)
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive.max(Duration::from_secs(1));
        self
    }

    fn options(&self, config: &BrokerConfig) -> MqttOptions {
        let mut options =
            MqttOptions::new(config.effective_client_id(), config.host.clone(), config.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }
        options
    }
}

impl Default for MqttBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn connect(
        &self,
        config: &BrokerConfig,
        events: BrokerEventSender,
    ) -> Result<Box<dyn BrokerHandle>, BrokerError> {
        let (client, mut event_loop) = AsyncClient::new(self.options(config), REQUEST_CAPACITY);

        wait_for_connack(&mut event_loop).await?;
        info!(endpoint = %config.endpoint(), "MQTT connection established");

        let closing = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_event_loop(event_loop, events, Arc::clone(&closing)));

        Ok(Box::new(MqttBrokerHandle {
            client,
            closing,
            event_loop: Mutex::new(Some(task)),
        }))
    }
}

/// Poll until the broker acknowledges the connection
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), BrokerError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(BrokerError::Refused(format!("{:?}", code))),
                };
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(BrokerError::Refused(format!("{:?}", code)));
            }
            Err(e) => return Err(BrokerError::Connect(e.to_string())),
        }
    }
}

/// Forward incoming publishes until the connection ends
async fn run_event_loop(
    mut event_loop: EventLoop,
    events: BrokerEventSender,
    closing: Arc<AtomicBool>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BrokerMessage {
                    topic: publish.topic.clone(),
                    payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    qos: from_rumqttc(publish.qos),
                    retain: publish.retain,
                };
                if events.send(BrokerEvent::Message(message)).is_err() {
                    debug!("Broker event receiver dropped, stopping event loop");
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if !closing.load(Ordering::SeqCst) {
                    warn!("MQTT connection lost: {}", e);
                    let _ = events.send(BrokerEvent::ConnectionLost(e.to_string()));
                }
                break;
            }
        }
    }
}

/// A live rumqttc connection
pub struct MqttBrokerHandle {
    client: AsyncClient,
    closing: Arc<AtomicBool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBrokerHandle {
    fn take_event_loop(&self) -> Option<JoinHandle<()>> {
        self.event_loop.lock().ok().and_then(|mut task| task.take())
    }
}

#[async_trait]
impl BrokerHandle for MqttBrokerHandle {
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), BrokerError> {
        self.client
            .subscribe(topic, to_rumqttc(qos))
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.client
            .publish(topic, to_rumqttc(qos), retain, payload.to_vec())
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))
    }

    async fn disconnect(&self, linger: Duration) {
        self.closing.store(true, Ordering::SeqCst);
        let task = self.take_event_loop();
        shut_down_within(linger, self.client.disconnect(), task).await;
    }
}

/// Send the disconnect request and wait for the event loop, both under one
/// `linger` deadline; the event loop is aborted if it outlives it
async fn shut_down_within<F: Future>(linger: Duration, request: F, task: Option<JoinHandle<()>>) {
    let deadline = Instant::now() + linger;

    if tokio::time::timeout_at(deadline, request).await.is_err() {
        debug!("MQTT disconnect request did not drain within {:?}", linger);
    }

    if let Some(mut task) = task
        && tokio::time::timeout_at(deadline, &mut task).await.is_err()
    {
        task.abort();
    }
}

impl Drop for MqttBrokerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.take_event_loop() {
            task.abort();
        }
    }
}

fn to_rumqttc(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_rumqttc(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}
