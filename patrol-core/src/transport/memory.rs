//! In-memory transport pair
//!
//! Used by tests and by anything that wants to drive the bridge without a
//! socket. The [`PeerHandle`] plays the role of the browser.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{TransportSink, TransportSource};
use crate::error::TransportError;

/// Create a connected sink/source pair and the peer end that talks to it
pub fn channel() -> (MemorySink, MemorySource, PeerHandle) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let fail_writes = Arc::new(AtomicBool::new(false));
    let closed = Arc::new(AtomicBool::new(false));

    let sink = MemorySink {
        outbound: outbound_tx,
        fail_writes: Arc::clone(&fail_writes),
        closed: Arc::clone(&closed),
    };
    let source = MemorySource {
        inbound: inbound_rx,
    };
    let peer = PeerHandle {
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
        fail_writes,
        closed,
    };

    (sink, source, peer)
}

/// Outbound half of the in-memory transport
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<String>,
    fail_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io("broken pipe".to_string()));
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Inbound half of the in-memory transport
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl TransportSource for MemorySource {
    async fn receive(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }
}

/// The far end of an in-memory transport
pub struct PeerHandle {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
    fail_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl PeerHandle {
    /// Send raw text to the bridge; returns false once hung up
    pub fn send_raw(&self, text: &str) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.to_string()).is_ok())
    }

    /// Send a JSON value to the bridge
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_raw(&value.to_string())
    }

    /// Next outbound envelope, waiting up to `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<serde_json::Value> {
        let text = tokio::time::timeout(timeout, self.outbound.recv())
            .await
            .ok()??;
        serde_json::from_str(&text).ok()
    }

    /// Next outbound envelope, waiting up to one second
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        self.recv_timeout(Duration::from_secs(1)).await
    }

    /// Peer hangs up: the source yields `None` from now on
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Make every following outbound write fail
    pub fn break_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Whether the bridge closed its side
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
