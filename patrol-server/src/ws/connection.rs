//! WebSocket connection handling
//!
//! An upgraded socket is split in two and handed to the bridge: the write
//! half becomes the session's transport sink, the read half feeds the
//! translator loop.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use patrol_core::{TransportError, TransportSink, TransportSource, serve_connection};
use tracing::{debug, info};

use crate::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();

    info!("WebSocket client connected");

    let client_id = serve_connection(
        Arc::clone(&state.registry),
        Box::new(WsSink { sender }),
        Box::new(WsSource { receiver }),
    )
    .await;

    info!(session_id = %client_id, "WebSocket client disconnected");
}

/// Write half of an upgraded WebSocket
pub struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sender
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sender.send(Message::Close(None)).await;
        let _ = self.sender.close().await;
    }
}

/// Read half of an upgraded WebSocket
pub struct WsSource {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportSource for WsSource {
    async fn receive(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.receiver.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => {
                    debug!("WebSocket client sent close frame");
                    return None;
                }
                Ok(_) => {
                    // Ignore binary, ping and pong frames
                }
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }
}
