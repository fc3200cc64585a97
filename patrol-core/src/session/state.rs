//! Session struct and state machine
//!
//! A Session bridges one transport to at most one live broker handle.
//!
//! Two locks live here and they are never confused:
//! - `inner` guards (state, config, handle, subscriptions) and is held for the
//!   whole of every broker-affecting operation, so those run one at a time.
//! - `outbound` guards the transport sink. Every write takes it, including
//!   broker deliveries arriving on their own task, so frames never interleave.
//!
//! `outbound` is always taken after `inner`, never before, and broker
//! handles never wait on either lock, which keeps teardown deadlock free.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{
    BrokerClient, BrokerConfig, BrokerEvent, BrokerEventReceiver, BrokerHandle, BrokerMessage, Qos,
};
use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult, BrokerError};
use crate::protocol::{PUBLISH_SUCCESS, ServerMessage};
use crate::transport::TransportSink;

/// State of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered, no broker handle
    Registered,
    /// Broker connect in flight
    Connecting,
    /// Broker handle live
    Connected,
    /// Broker dropped the connection on its own
    Disconnected,
    /// Removed from the registry; terminal
    Removed,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub state: SessionState,
    /// `host:port` of the last applied broker config
    pub broker: Option<String>,
    pub subscriptions: Vec<String>,
}

struct SessionInner {
    state: SessionState,
    config: Option<BrokerConfig>,
    handle: Option<Box<dyn BrokerHandle>>,
    subscriptions: BTreeSet<String>,
}

impl SessionInner {
    fn snapshot(&self, id: &str) -> SessionSnapshot {
        SessionSnapshot {
            id: id.to_string(),
            state: self.state,
            broker: self.config.as_ref().map(BrokerConfig::endpoint),
            subscriptions: self.subscriptions.iter().cloned().collect(),
        }
    }

    /// The broker handle, only while connected
    fn live_handle(&self) -> Option<&dyn BrokerHandle> {
        match self.state {
            SessionState::Connected => self.handle.as_deref(),
            _ => None,
        }
    }
}

/// Transport sink guarded by its own lock
struct Outbound {
    sink: Mutex<Option<Box<dyn TransportSink>>>,
    closed: CancellationToken,
}

impl Outbound {
    fn new(sink: Box<dyn TransportSink>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            closed: CancellationToken::new(),
        }
    }

    /// Write one envelope. A failed write marks the transport closed.
    async fn send(&self, session_id: &str, message: &ServerMessage) -> bool {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(session_id, kind = message.kind(), "Failed to encode envelope: {}", e);
                return false;
            }
        };

        let mut sink = self.sink.lock().await;
        let Some(transport) = sink.as_mut() else {
            return false;
        };

        match transport.send(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id, "Transport write failed, closing: {}", e);
                self.closed.cancel();
                false
            }
        }
    }

    async fn close(&self) {
        if let Some(mut transport) = self.sink.lock().await.take() {
            transport.close().await;
        }
        self.closed.cancel();
    }
}

/// A bridge session wrapping one transport and its broker connection
pub struct Session {
    id: String,
    broker: Arc<dyn BrokerClient>,
    settings: BridgeSettings,
    inner: Mutex<SessionInner>,
    outbound: Outbound,
    /// Copy of `inner` readable while a broker call holds the lock
    status: watch::Sender<SessionSnapshot>,
    /// Identifies the current broker handle; bumped on every connect attempt
    /// and teardown so events from older handles can be recognized.
    generation: AtomicU64,
}

impl Session {
    /// Create a session in `Registered` state
    pub fn new(
        id: impl Into<String>,
        transport: Box<dyn TransportSink>,
        broker: Arc<dyn BrokerClient>,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        let id = id.into();
        let inner = SessionInner {
            state: SessionState::Registered,
            config: None,
            handle: None,
            subscriptions: BTreeSet::new(),
        };
        let (status, _) = watch::channel(inner.snapshot(&id));

        Arc::new(Self {
            id,
            broker,
            settings,
            inner: Mutex::new(inner),
            outbound: Outbound::new(transport),
            status,
            generation: AtomicU64::new(0),
        })
    }

    /// Get the session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get current session state
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Whether a broker handle is live
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.live_handle().is_some()
    }

    /// Topic filters currently registered with the broker
    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().await.subscriptions.iter().cloned().collect()
    }

    /// Last successfully applied broker config
    pub async fn config(&self) -> Option<BrokerConfig> {
        self.inner.lock().await.config.clone()
    }

    /// Last published view of the session; never waits on broker I/O
    pub fn snapshot(&self) -> SessionSnapshot {
        self.status.borrow().clone()
    }

    fn publish_status(&self, inner: &SessionInner) {
        self.status.send_replace(inner.snapshot(&self.id));
    }

    /// Resolves once the transport is closed or a write to it failed
    pub async fn transport_closed(&self) {
        self.outbound.closed.cancelled().await
    }

    /// Send an envelope to the client
    ///
    /// Returns false if the transport is gone.
    pub async fn emit(&self, message: ServerMessage) -> bool {
        self.outbound.send(&self.id, &message).await
    }

    /// Report an error to the client and hand it back
    async fn reject<T>(&self, error: BridgeError) -> BridgeResult<T> {
        warn!(session_id = %self.id, "{}", error);
        self.emit(ServerMessage::error(&error)).await;
        Err(error)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Open a broker connection, replacing any existing one
    #[instrument(name = "session::connect", skip(self, config), fields(session_id = %self.id))]
    pub async fn connect(self: &Arc<Self>, config: Option<BrokerConfig>) -> BridgeResult<()> {
        let Some(config) = config else {
            return self.reject(BridgeError::ConfigMissing).await;
        };
        if let Err(e) = config.validate() {
            return self.reject(e).await;
        }

        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Removed {
            return Err(BridgeError::ClientNotFound(self.id.clone()));
        }
        if inner.handle.is_some() {
            info!("Replacing existing broker connection");
            self.teardown(&mut inner).await;
        }

        inner.state = SessionState::Connecting;
        self.publish_status(&inner);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(endpoint = %config.endpoint(), "Connecting to broker");
        let timeout = self.settings.connect_timeout;
        let attempt = tokio::time::timeout(timeout, self.broker.connect(&config, events_tx)).await;
        let result = attempt.unwrap_or_else(|_| Err(BrokerError::Timeout(timeout.as_millis() as u64)));

        match result {
            Ok(handle) if self.is_current(generation) => {
                inner.handle = Some(handle);
                inner.state = SessionState::Connected;
                info!(endpoint = %config.endpoint(), "Broker connected");
                inner.config = Some(config);
                self.publish_status(&inner);

                tokio::spawn(pump_broker_events(
                    Arc::downgrade(self),
                    generation,
                    events_rx,
                ));

                self.emit(ServerMessage::MqttConnected).await;
                Ok(())
            }
            Ok(handle) => {
                debug!("Discarding broker connection superseded by a newer attempt");
                handle.disconnect(self.settings.disconnect_linger).await;
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %config.endpoint(), "Broker connection failed: {}", e);
                if self.is_current(generation) {
                    inner.state = SessionState::Registered;
                    self.publish_status(&inner);
                }
                self.emit(ServerMessage::MqttError {
                    payload: e.to_string(),
                })
                .await;
                Err(BridgeError::BrokerConnectFailure(e))
            }
        }
    }

    /// Drop the broker connection if any; the session stays registered
    #[instrument(name = "session::disconnect", skip(self), fields(session_id = %self.id))]
    pub async fn disconnect(&self) -> BridgeResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Removed {
            return Ok(());
        }
        self.teardown(&mut inner).await;
        inner.state = SessionState::Registered;
        self.publish_status(&inner);
        Ok(())
    }

    #[instrument(name = "session::subscribe", skip(self), fields(session_id = %self.id))]
    pub async fn subscribe(&self, topic: &str, qos: i64) -> BridgeResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(handle) = inner.live_handle() else {
            return self.reject(BridgeError::NotConnected).await;
        };
        let qos = match Qos::try_from(qos) {
            Ok(qos) => qos,
            Err(e) => return self.reject(e).await,
        };

        let result = handle.subscribe(topic, qos).await;
        match result {
            Ok(()) => {
                inner.subscriptions.insert(topic.to_string());
                self.publish_status(&inner);
                info!("Subscribed to topic");
                self.emit(ServerMessage::SubscriptionSuccess {
                    topic: topic.to_string(),
                    qos: qos.as_u8(),
                })
                .await;
                Ok(())
            }
            Err(e) => {
                self.emit(ServerMessage::SubscribeResult {
                    topic: topic.to_string(),
                    payload: e.to_string(),
                })
                .await;
                self.reject(BridgeError::Broker(e)).await
            }
        }
    }

    #[instrument(name = "session::unsubscribe", skip(self), fields(session_id = %self.id))]
    pub async fn unsubscribe(&self, topic: &str) -> BridgeResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(handle) = inner.live_handle() else {
            return self.reject(BridgeError::NotConnected).await;
        };

        let result = handle.unsubscribe(topic).await;
        match result {
            Ok(()) => {
                inner.subscriptions.remove(topic);
                self.publish_status(&inner);
                info!("Unsubscribed from topic");
                Ok(())
            }
            Err(e) => self.reject(BridgeError::Broker(e)).await,
        }
    }

    /// Publish through the broker; always answers with one `publish_result`
    #[instrument(name = "session::publish", skip(self, payload), fields(session_id = %self.id))]
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: i64,
        retain: bool,
    ) -> BridgeResult<()> {
        let inner = self.inner.lock().await;
        let Some(handle) = inner.live_handle() else {
            return self.reject(BridgeError::NotConnected).await;
        };

        let result = match Qos::try_from(qos) {
            Ok(qos) => handle
                .publish(topic, payload.as_bytes(), qos, retain)
                .await
                .map_err(BridgeError::from),
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(()) => {
                debug!("Published");
                PUBLISH_SUCCESS.to_string()
            }
            Err(e) => {
                warn!("Publish failed: {}", e);
                e.to_string()
            }
        };
        self.emit(ServerMessage::PublishResult {
            topic: topic.to_string(),
            payload: outcome,
        })
        .await;
        result
    }

    /// Tear down the broker handle and close the transport; idempotent
    pub async fn close(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Removed {
                self.teardown(&mut inner).await;
                inner.state = SessionState::Removed;
                self.publish_status(&inner);
            }
        }
        self.outbound.close().await;
    }

    /// Release the broker handle. Caller sets the resulting state.
    async fn teardown(&self, inner: &mut SessionInner) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        inner.subscriptions.clear();
        if let Some(handle) = inner.handle.take() {
            handle.disconnect(self.settings.disconnect_linger).await;
            info!(session_id = %self.id, "Broker connection closed");
        }
    }

    /// Handle one event from the broker handle of `generation`
    ///
    /// Returns false when the event stream for that generation is finished.
    async fn on_broker_event(&self, generation: u64, event: BrokerEvent) -> bool {
        if !self.is_current(generation) {
            debug!(session_id = %self.id, "Dropping event from stale broker connection");
            return false;
        }

        match event {
            BrokerEvent::Message(message) => {
                self.deliver(message).await;
                true
            }
            BrokerEvent::ConnectionLost(reason) => {
                self.connection_lost(generation, &reason).await;
                false
            }
        }
    }

    async fn deliver(&self, message: BrokerMessage) {
        debug!(session_id = %self.id, topic = %message.topic, "Relaying broker message");
        self.emit(ServerMessage::from(message)).await;
    }

    async fn connection_lost(&self, generation: u64, reason: &str) {
        let mut inner = self.inner.lock().await;
        if !self.is_current(generation) || inner.handle.is_none() {
            return;
        }

        warn!(session_id = %self.id, "Broker connection lost: {}", reason);
        self.generation.fetch_add(1, Ordering::SeqCst);
        inner.handle = None;
        inner.subscriptions.clear();
        inner.state = SessionState::Disconnected;
        self.publish_status(&inner);
        self.emit(ServerMessage::MqttDisconnected).await;
    }
}

/// Forward broker events for one handle generation into its session
async fn pump_broker_events(
    session: Weak<Session>,
    generation: u64,
    mut events: BrokerEventReceiver,
) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        if !session.on_broker_event(generation, event).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::MockBrokerClient;
    use crate::transport::memory::{self, PeerHandle};

    fn settings() -> BridgeSettings {
        BridgeSettings::new(Duration::from_millis(200), Duration::from_millis(50))
    }

    fn create_test_session(broker: &MockBrokerClient) -> (Arc<Session>, PeerHandle) {
        let (sink, _source, peer) = memory::channel();
        let session = Session::new(
            "client_test",
            Box::new(sink),
            Arc::new(broker.clone()),
            settings(),
        );
        (session, peer)
    }

    fn broker_config() -> Option<BrokerConfig> {
        Some(BrokerConfig::new("broker.local", 1883))
    }

    async fn connected_session(broker: &MockBrokerClient) -> (Arc<Session>, PeerHandle) {
        let (session, mut peer) = create_test_session(broker);
        session.connect(broker_config()).await.unwrap();
        assert_eq!(peer.recv().await.unwrap()["type"], "mqtt_connected");
        (session, peer)
    }

    async fn expect_silence(peer: &mut PeerHandle) {
        assert!(
            peer.recv_timeout(Duration::from_millis(50)).await.is_none(),
            "Expected no message but received one"
        );
    }

    // ==================== Connect Tests ====================

    #[tokio::test]
    async fn new_session_is_registered() {
        let broker = MockBrokerClient::new();
        let (session, _peer) = create_test_session(&broker);

        assert_eq!(session.state().await, SessionState::Registered);
        assert!(!session.is_connected().await);
        assert!(session.config().await.is_none());
    }

    #[tokio::test]
    async fn connect_without_config_is_rejected() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = create_test_session(&broker);

        let result = session.connect(None).await;

        assert!(matches!(result, Err(BridgeError::ConfigMissing)));
        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["payload"], "config is required for connect");
        assert_eq!(broker.connect_count(), 0);
    }

    #[tokio::test]
    async fn connect_with_invalid_config_is_rejected() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = create_test_session(&broker);

        let result = session.connect(Some(BrokerConfig::new("", 1883))).await;

        assert!(matches!(result, Err(BridgeError::InvalidConfig(_))));
        assert_eq!(peer.recv().await.unwrap()["type"], "error");
        assert_eq!(broker.connect_count(), 0);
    }

    #[tokio::test]
    async fn connect_success_emits_mqtt_connected() {
        let broker = MockBrokerClient::new();
        let (session, _peer) = connected_session(&broker).await;

        assert_eq!(session.state().await, SessionState::Connected);
        assert!(session.is_connected().await);
        assert_eq!(
            session.config().await.map(|c| c.endpoint()),
            Some("broker.local:1883".to_string())
        );
    }

    #[tokio::test]
    async fn connect_failure_emits_single_mqtt_error() {
        let broker = MockBrokerClient::new();
        broker.refuse_connections("not authorized");
        let (session, mut peer) = create_test_session(&broker);

        let result = session.connect(broker_config()).await;

        assert!(matches!(result, Err(BridgeError::BrokerConnectFailure(_))));
        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "mqtt_error");
        assert!(msg["payload"].as_str().unwrap().contains("not authorized"));
        expect_silence(&mut peer).await;
        assert!(!session.is_connected().await);
        assert_eq!(session.state().await, SessionState::Registered);
    }

    #[tokio::test]
    async fn connect_times_out() {
        let broker = MockBrokerClient::new();
        broker.set_connect_delay(Duration::from_secs(5));
        let (session, mut peer) = create_test_session(&broker);

        let result = session.connect(broker_config()).await;

        assert!(matches!(
            result,
            Err(BridgeError::BrokerConnectFailure(BrokerError::Timeout(200)))
        ));
        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "mqtt_error");
        assert!(msg["payload"].as_str().unwrap().contains("timed out"));
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn reconnect_replaces_previous_handle() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;
        session.subscribe("t/1", 0).await.unwrap();
        peer.recv().await.unwrap();

        session
            .connect(Some(BrokerConfig::new("other.local", 8883)))
            .await
            .unwrap();

        assert_eq!(peer.recv().await.unwrap()["type"], "mqtt_connected");
        assert_eq!(broker.connect_count(), 2);
        assert_eq!(broker.disconnect_count(), 1);
        assert_eq!(broker.live_endpoints(), vec!["other.local:8883".to_string()]);
        assert!(session.subscriptions().await.is_empty());
    }

    // ==================== Disconnect Tests ====================

    #[tokio::test]
    async fn disconnect_releases_handle() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;

        session.disconnect().await.unwrap();

        assert_eq!(session.state().await, SessionState::Registered);
        assert!(!session.is_connected().await);
        assert_eq!(broker.live_connections(), 0);
        expect_silence(&mut peer).await;
    }

    #[tokio::test]
    async fn disconnect_when_not_connected_is_noop() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = create_test_session(&broker);

        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(session.state().await, SessionState::Registered);
        assert_eq!(broker.disconnect_count(), 0);
        expect_silence(&mut peer).await;
    }

    // ==================== Subscribe / Unsubscribe Tests ====================

    #[tokio::test]
    async fn subscribe_requires_connection() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = create_test_session(&broker);

        let result = session.subscribe("t/1", 1).await;

        assert!(matches!(result, Err(BridgeError::NotConnected)));
        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["payload"], "MQTT client not connected");
        assert!(session.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn subscribe_records_topic_and_relays_messages() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;

        session.subscribe("t/1", 1).await.unwrap();
        let ack = peer.recv().await.unwrap();
        assert_eq!(ack["type"], "subscription_success");
        assert_eq!(ack["topic"], "t/1");
        assert_eq!(ack["qos"], 1);
        assert_eq!(session.subscriptions().await, vec!["t/1".to_string()]);

        assert_eq!(broker.deliver("t/1", "hello"), 1);
        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "mqtt_message");
        assert_eq!(msg["topic"], "t/1");
        assert_eq!(msg["payload"], "hello");
        assert_eq!(msg["retain"], false);
    }

    #[tokio::test]
    async fn subscribe_rejects_invalid_qos() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;

        let result = session.subscribe("t/1", 3).await;

        assert!(matches!(result, Err(BridgeError::InvalidQos(3))));
        assert_eq!(peer.recv().await.unwrap()["type"], "error");
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;
        broker.fail_subscribes("not authorized for topic");

        let result = session.subscribe("secret/#", 0).await;

        assert!(matches!(result, Err(BridgeError::Broker(_))));
        let result = peer.recv().await.unwrap();
        assert_eq!(result["type"], "subscribe_result");
        assert_eq!(result["topic"], "secret/#");
        assert!(result["payload"].as_str().unwrap().contains("not authorized"));
        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "error");
        assert!(msg["payload"].as_str().unwrap().contains("not authorized"));
        expect_silence(&mut peer).await;
        assert!(session.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_topic() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;
        session.subscribe("t/1", 0).await.unwrap();
        peer.recv().await.unwrap();

        session.unsubscribe("t/1").await.unwrap();

        assert!(session.subscriptions().await.is_empty());
        assert!(broker.subscriptions().is_empty());
        assert_eq!(broker.deliver("t/1", "late"), 0);
        expect_silence(&mut peer).await;
    }

    #[tokio::test]
    async fn unsubscribe_requires_connection() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = create_test_session(&broker);

        let result = session.unsubscribe("t/1").await;

        assert!(matches!(result, Err(BridgeError::NotConnected)));
        assert_eq!(peer.recv().await.unwrap()["type"], "error");
    }

    // ==================== Publish Tests ====================

    #[tokio::test]
    async fn publish_requires_connection() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = create_test_session(&broker);

        let result = session.publish("t/1", "x", 0, false).await;

        assert!(matches!(result, Err(BridgeError::NotConnected)));
        assert_eq!(peer.recv().await.unwrap()["type"], "error");
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn publish_success_reports_result() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;

        session.publish("cmd/takeoff", "{}", 1, true).await.unwrap();

        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "publish_result");
        assert_eq!(msg["topic"], "cmd/takeoff");
        assert_eq!(msg["payload"], PUBLISH_SUCCESS);

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].qos, Qos::AtLeastOnce);
        assert!(published[0].retain);
    }

    #[tokio::test]
    async fn publish_failure_reports_result() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;
        broker.fail_publishes("queue full");

        let result = session.publish("cmd/land", "{}", 0, false).await;

        assert!(result.is_err());
        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "publish_result");
        assert!(msg["payload"].as_str().unwrap().contains("queue full"));
        expect_silence(&mut peer).await;
    }

    #[tokio::test]
    async fn publish_with_invalid_qos_reports_result() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;

        let result = session.publish("t", "x", 9, false).await;

        assert!(matches!(result, Err(BridgeError::InvalidQos(9))));
        let msg = peer.recv().await.unwrap();
        assert_eq!(msg["type"], "publish_result");
        assert_eq!(msg["payload"], "invalid qos: 9");
    }

    // ==================== Broker Event Tests ====================

    #[tokio::test]
    async fn connection_lost_moves_to_disconnected() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;
        session.subscribe("t/1", 0).await.unwrap();
        peer.recv().await.unwrap();

        broker.drop_connections("keep-alive timeout");

        assert_eq!(peer.recv().await.unwrap()["type"], "mqtt_disconnected");
        assert_eq!(session.state().await, SessionState::Disconnected);
        assert!(!session.is_connected().await);
        assert!(session.subscriptions().await.is_empty());

        assert!(matches!(
            session.subscribe("t/1", 0).await,
            Err(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn reconnect_after_connection_lost() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;
        broker.drop_connections("network down");
        assert_eq!(peer.recv().await.unwrap()["type"], "mqtt_disconnected");

        session.connect(broker_config()).await.unwrap();

        assert_eq!(peer.recv().await.unwrap()["type"], "mqtt_connected");
        assert_eq!(session.state().await, SessionState::Connected);
    }

    #[tokio::test]
    async fn stale_events_are_dropped() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;
        let stale = session.generation.load(Ordering::SeqCst);

        session.disconnect().await.unwrap();

        let message = BrokerMessage {
            topic: "t/1".to_string(),
            payload: "old".to_string(),
            qos: Qos::AtMostOnce,
            retain: false,
        };
        assert!(!session.on_broker_event(stale, BrokerEvent::Message(message)).await);
        assert!(
            !session
                .on_broker_event(stale, BrokerEvent::ConnectionLost("old".to_string()))
                .await
        );
        expect_silence(&mut peer).await;
        assert_eq!(session.state().await, SessionState::Registered);
    }

    // ==================== Close Tests ====================

    #[tokio::test]
    async fn close_tears_down_and_is_idempotent() {
        let broker = MockBrokerClient::new();
        let (session, peer) = connected_session(&broker).await;

        session.close().await;
        session.close().await;

        assert_eq!(session.state().await, SessionState::Removed);
        assert_eq!(broker.live_connections(), 0);
        assert_eq!(broker.disconnect_count(), 1);
        assert!(peer.is_closed());
        assert!(!session.emit(ServerMessage::MqttConnected).await);
    }

    #[tokio::test]
    async fn connect_after_close_fails() {
        let broker = MockBrokerClient::new();
        let (session, _peer) = create_test_session(&broker);
        session.close().await;

        let result = session.connect(broker_config()).await;

        assert!(matches!(result, Err(BridgeError::ClientNotFound(_))));
        assert_eq!(broker.connect_count(), 0);
    }

    #[tokio::test]
    async fn write_failure_signals_transport_closed() {
        let broker = MockBrokerClient::new();
        let (session, peer) = create_test_session(&broker);
        peer.break_writes();

        assert!(!session.emit(ServerMessage::MqttConnected).await);

        tokio::time::timeout(Duration::from_secs(1), session.transport_closed())
            .await
            .expect("transport should be marked closed");
    }

    #[tokio::test]
    async fn snapshot_reports_state() {
        let broker = MockBrokerClient::new();
        let (session, mut peer) = connected_session(&broker).await;
        session.subscribe("t/#", 0).await.unwrap();
        peer.recv().await.unwrap();

        let snapshot = session.snapshot();

        assert_eq!(snapshot.id, "client_test");
        assert_eq!(snapshot.state, SessionState::Connected);
        assert_eq!(snapshot.broker.as_deref(), Some("broker.local:1883"));
        assert_eq!(snapshot.subscriptions, vec!["t/#".to_string()]);
    }
}
