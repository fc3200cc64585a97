//! Protocol translator
//!
//! Drives one transport connection: registers a session, greets the
//! client, then decodes inbound frames in arrival order and applies them
//! to the session until the transport goes away.

use std::sync::Arc;

use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::SessionRegistry;
use crate::transport::{TransportSink, TransportSource};

/// Serve one transport connection to completion
///
/// Returns the client id that was assigned. By the time this returns the
/// session has been torn down and removed from the registry.
pub async fn serve_connection(
    registry: Arc<SessionRegistry>,
    sink: Box<dyn TransportSink>,
    mut source: Box<dyn TransportSource>,
) -> String {
    let id = registry.register(sink).await;
    let span = info_span!("bridge", session_id = %id);

    async {
        let Ok(session) = registry.lookup(&id).await else {
            return;
        };
        session.emit(ServerMessage::welcome(&id)).await;

        loop {
            tokio::select! {
                _ = session.transport_closed() => {
                    info!("Transport write failed, ending session");
                    break;
                }
                frame = source.receive() => match frame {
                    Some(Ok(text)) => {
                        // Failures are already reported to the client
                        let _ = dispatch(&registry, &id, &text).await;
                    }
                    Some(Err(e)) => {
                        warn!("Transport read failed: {}", e);
                        break;
                    }
                    None => {
                        info!("Client disconnected");
                        break;
                    }
                },
            }
        }

        registry.remove(&id).await;
    }
    .instrument(span)
    .await;

    id
}

/// Decode one inbound frame and apply it to session `id`
pub async fn dispatch(registry: &SessionRegistry, id: &str, text: &str) -> BridgeResult<()> {
    let session = match registry.lookup(id).await {
        Ok(session) => session,
        Err(e) => {
            warn!("{}", e);
            return Err(e);
        }
    };

    let message = match ClientMessage::decode(text) {
        Ok(message) => message,
        Err(e @ BridgeError::UnknownMessageType(_)) => {
            warn!("Dropping frame: {}", e);
            session.emit(ServerMessage::error(&e)).await;
            return Err(e);
        }
        Err(e) => {
            warn!("Dropping malformed frame: {}", e);
            return Err(e);
        }
    };

    debug!(kind = message.kind(), "Dispatching");
    match message {
        ClientMessage::Connect { config } => session.connect(config).await,
        ClientMessage::Disconnect => session.disconnect().await,
        ClientMessage::Subscribe { topic, qos } => session.subscribe(&topic, qos).await,
        ClientMessage::Unsubscribe { topic } => session.unsubscribe(&topic).await,
        ClientMessage::Publish {
            topic,
            payload,
            qos,
            retain,
        } => session.publish(&topic, &payload, qos, retain).await,
    }
}
