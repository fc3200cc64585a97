//! Transport abstraction
//!
//! A transport is an already-upgraded, message-framed duplex channel
//! (a WebSocket in production). It is split in two halves: the sink is
//! owned by the session and shared with broker deliveries, the source is
//! read by exactly one translator loop.

pub mod memory;

use async_trait::async_trait;

use crate::error::TransportError;

/// Outbound half of a transport
#[async_trait]
pub trait TransportSink: Send {
    /// Send one text frame
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection; further sends fail
    async fn close(&mut self);
}

/// Inbound half of a transport
#[async_trait]
pub trait TransportSource: Send {
    /// Next text frame, or `None` once the peer has gone
    async fn receive(&mut self) -> Option<Result<String, TransportError>>;
}
