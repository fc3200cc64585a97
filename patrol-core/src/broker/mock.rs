//! In-memory broker for tests
//!
//! MockBrokerClient records every call and lets tests script failures,
//! inject deliveries and simulate connection loss, enabling fast,
//! deterministic testing of Session logic without a real broker.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{
    BrokerClient, BrokerConfig, BrokerEvent, BrokerEventSender, BrokerHandle, BrokerMessage, Qos,
};
use crate::error::BrokerError;

/// A publish recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
    pub retain: bool,
}

struct MockLink {
    id: usize,
    endpoint: String,
    events: Option<BrokerEventSender>,
    subscriptions: Vec<(String, Qos)>,
    live: bool,
}

#[derive(Default)]
struct MockState {
    refuse_with: Option<String>,
    connect_delay: Option<Duration>,
    fail_publish_with: Option<String>,
    fail_subscribe_with: Option<String>,
    connects: usize,
    disconnects: usize,
    links: Vec<MockLink>,
    published: Vec<PublishedMessage>,
}

/// Scriptable broker client shared between a test and the code under test
#[derive(Clone, Default)]
pub struct MockBrokerClient {
    state: Arc<Mutex<MockState>>,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock_state(&self.state)
    }

    /// Make every following connect fail with `reason`
    pub fn refuse_connections(&self, reason: &str) {
        self.lock().refuse_with = Some(reason.to_string());
    }

    /// Accept connects again
    pub fn accept_connections(&self) {
        self.lock().refuse_with = None;
    }

    /// Delay each connect attempt
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Make every following publish fail with `reason`
    pub fn fail_publishes(&self, reason: &str) {
        self.lock().fail_publish_with = Some(reason.to_string());
    }

    /// Make every following subscribe fail with `reason`
    pub fn fail_subscribes(&self, reason: &str) {
        self.lock().fail_subscribe_with = Some(reason.to_string());
    }

    /// Number of successful connects so far
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Number of bridge-initiated disconnects so far
    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    /// Number of handles that are still connected
    pub fn live_connections(&self) -> usize {
        self.lock().links.iter().filter(|l| l.live).count()
    }

    /// Endpoints of live connections, in connect order
    pub fn live_endpoints(&self) -> Vec<String> {
        self.lock()
            .links
            .iter()
            .filter(|l| l.live)
            .map(|l| l.endpoint.clone())
            .collect()
    }

    /// Topic filters registered across all live connections
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock()
            .links
            .iter()
            .filter(|l| l.live)
            .flat_map(|l| l.subscriptions.iter().map(|(t, _)| t.clone()))
            .collect()
    }

    /// Every publish accepted so far
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Deliver a message to each live connection subscribed to a matching filter
    ///
    /// Returns how many connections received it.
    pub fn deliver(&self, topic: &str, payload: &str) -> usize {
        self.deliver_message(BrokerMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos: Qos::AtMostOnce,
            retain: false,
        })
    }

    /// Deliver a fully specified message
    pub fn deliver_message(&self, message: BrokerMessage) -> usize {
        let state = self.lock();
        let mut delivered = 0;
        for link in state.links.iter().filter(|l| l.live) {
            let matching = link
                .subscriptions
                .iter()
                .find(|(filter, _)| topic_matches(filter, &message.topic));
            if let Some((_, granted)) = matching {
                let mut copy = message.clone();
                if copy.qos.as_u8() > granted.as_u8() {
                    copy.qos = *granted;
                }
                let sent = link
                    .events
                    .as_ref()
                    .is_some_and(|tx| tx.send(BrokerEvent::Message(copy)).is_ok());
                if sent {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Drop every live connection as if the network went away
    pub fn drop_connections(&self, reason: &str) {
        let mut state = self.lock();
        for link in state.links.iter_mut().filter(|l| l.live) {
            link.live = false;
            if let Some(events) = link.events.take() {
                let _ = events.send(BrokerEvent::ConnectionLost(reason.to_string()));
            }
        }
    }
}

fn lock_state(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn connect(
        &self,
        config: &BrokerConfig,
        events: BrokerEventSender,
    ) -> Result<Box<dyn BrokerHandle>, BrokerError> {
        let delay = self.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(reason) = &state.refuse_with {
            return Err(BrokerError::Connect(reason.clone()));
        }

        let id = state.links.len();
        state.connects += 1;
        state.links.push(MockLink {
            id,
            endpoint: config.endpoint(),
            events: Some(events),
            subscriptions: Vec::new(),
            live: true,
        });

        Ok(Box::new(MockBrokerHandle {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Handle returned by [`MockBrokerClient`]
pub struct MockBrokerHandle {
    id: usize,
    state: Arc<Mutex<MockState>>,
}

impl MockBrokerHandle {
    fn with_live_link<R>(
        &self,
        f: impl FnOnce(&mut MockState, usize) -> Result<R, BrokerError>,
    ) -> Result<R, BrokerError> {
        let mut state = lock_state(&self.state);
        let index = state
            .links
            .iter()
            .position(|l| l.id == self.id && l.live)
            .ok_or(BrokerError::Closed)?;
        f(&mut *state, index)
    }
}

#[async_trait]
impl BrokerHandle for MockBrokerHandle {
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), BrokerError> {
        self.with_live_link(|state, index| {
            if let Some(reason) = &state.fail_subscribe_with {
                return Err(BrokerError::Request(reason.clone()));
            }
            let subscriptions = &mut state.links[index].subscriptions;
            subscriptions.retain(|(t, _)| t != topic);
            subscriptions.push((topic.to_string(), qos));
            Ok(())
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.with_live_link(|state, index| {
            state.links[index].subscriptions.retain(|(t, _)| t != topic);
            Ok(())
        })
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), BrokerError> {
        self.with_live_link(|state, _| {
            if let Some(reason) = &state.fail_publish_with {
                return Err(BrokerError::Request(reason.clone()));
            }
            state.published.push(PublishedMessage {
                topic: topic.to_string(),
                payload: String::from_utf8_lossy(payload).into_owned(),
                qos,
                retain,
            });
            Ok(())
        })
    }

    async fn disconnect(&self, _linger: Duration) {
        let mut state = lock_state(&self.state);
        let closed = match state.links.iter_mut().find(|l| l.id == self.id && l.live) {
            Some(link) => {
                link.live = false;
                link.events = None;
                true
            }
            None => false,
        };
        if closed {
            state.disconnects += 1;
        }
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
