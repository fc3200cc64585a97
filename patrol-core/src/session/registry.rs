//! SessionRegistry for tracking live bridge sessions
//!
//! The registry owns the id -> session map. Its lock is only ever held
//! for map reads and writes, never across broker or transport I/O.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::BrokerClient;
use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::TransportSink;

use super::state::{Session, SessionSnapshot};

/// Registry of bridge sessions keyed by client id
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    broker: Arc<dyn BrokerClient>,
    settings: BridgeSettings,
}

impl SessionRegistry {
    /// Create an empty registry whose sessions connect through `broker`
    pub fn new(broker: Arc<dyn BrokerClient>, settings: BridgeSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            broker,
            settings,
        }
    }

    pub fn settings(&self) -> BridgeSettings {
        self.settings
    }

    /// Register a new session for `transport`
    ///
    /// Returns the generated client id.
    pub async fn register(&self, transport: Box<dyn TransportSink>) -> String {
        let id = format!("client_{}", Uuid::new_v4().simple());
        let session = Session::new(
            id.clone(),
            transport,
            Arc::clone(&self.broker),
            self.settings,
        );

        self.sessions.write().await.insert(id.clone(), session);
        info!(session_id = %id, "Session registered");
        id
    }

    /// Find a session by id
    pub async fn lookup(&self, id: &str) -> BridgeResult<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::ClientNotFound(id.to_string()))
    }

    /// Close a session and drop it from the registry
    ///
    /// Removing an unknown id is a no-op.
    pub async fn remove(&self, id: &str) {
        let session = self.sessions.read().await.get(id).cloned();
        let Some(session) = session else {
            debug!(session_id = %id, "Remove for unknown session ignored");
            return;
        };

        session.close().await;
        if self.sessions.write().await.remove(id).is_some() {
            info!(session_id = %id, "Session removed");
        }
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshots of every session, ordered by id
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .await
            .values()
            .map(|session| session.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }
}
