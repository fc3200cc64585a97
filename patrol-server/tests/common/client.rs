//! WebSocket test client for bridge protocol testing
//!
//! Provides both low-level WsConnection and high-level TestClient.
//!
//! Note: Some methods may appear unused because they're only used in specific
//! test files and clippy checks each test independently.

use std::net::SocketAddr;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Low-level WebSocket connection
pub struct WsConnection {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl WsConnection {
    /// Connect to the bridge endpoint
    pub async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{}/ws/mqtt", addr);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("Failed to connect");
        let (sink, stream) = ws.split();
        Self { sink, stream }
    }

    /// Send raw text message
    pub async fn send_raw(&mut self, msg: &str) {
        self.sink
            .send(Message::Text(msg.to_string().into()))
            .await
            .unwrap();
    }

    /// Send JSON message
    pub async fn send_json<T: Serialize>(&mut self, msg: &T) {
        let json = serde_json::to_string(msg).unwrap();
        self.send_raw(&json).await;
    }

    /// Send a binary frame
    #[allow(dead_code)]
    pub async fn send_binary(&mut self, data: &[u8]) {
        self.sink
            .send(Message::Binary(data.to_vec().into()))
            .await
            .unwrap();
    }

    /// Close the connection from the client side
    pub async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }

    /// Receive raw text message
    pub async fn recv_raw(&mut self) -> String {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Ping(_))) => continue,
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {}", e),
                None => panic!("WebSocket closed"),
            }
        }
    }

    /// Receive and deserialize JSON message
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> T {
        let text = self.recv_raw().await;
        serde_json::from_str(&text).expect("Failed to parse JSON")
    }

    /// Receive with timeout, returns None if timeout
    pub async fn recv_timeout(&mut self, duration: Duration) -> Option<String> {
        tokio::time::timeout(duration, self.recv_raw()).await.ok()
    }
}

/// High-level test client with helper methods
pub struct TestClient {
    pub conn: WsConnection,
    pub client_id: String,
}

impl TestClient {
    /// Connect to server (consumes the welcome message)
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut conn = WsConnection::connect(addr).await;

        let welcome: Value = conn.recv_json().await;
        assert_eq!(
            welcome["type"], "welcome",
            "Expected welcome message on connect"
        );
        let client_id = welcome["clientId"].as_str().unwrap().to_string();

        Self { conn, client_id }
    }

    /// Open a broker connection and wait for mqtt_connected
    #[allow(dead_code)]
    pub async fn connect_broker(&mut self, host: &str, port: u16) {
        self.conn
            .send_json(&json!({
                "type": "connect",
                "config": {"host": host, "port": port},
            }))
            .await;

        let response = self.recv().await;
        assert_eq!(
            response["type"], "mqtt_connected",
            "Expected mqtt_connected but got: {}",
            response
        );
    }

    /// Subscribe and wait for subscription_success
    #[allow(dead_code)]
    pub async fn subscribe(&mut self, topic: &str, qos: u8) {
        self.conn
            .send_json(&json!({"type": "subscribe", "topic": topic, "qos": qos}))
            .await;

        let response = self.recv().await;
        assert_eq!(
            response["type"], "subscription_success",
            "Expected subscription_success but got: {}",
            response
        );
    }

    /// Publish and return the publish_result payload
    #[allow(dead_code)]
    pub async fn publish(&mut self, topic: &str, payload: &str) -> String {
        self.conn
            .send_json(&json!({"type": "publish", "topic": topic, "payload": payload}))
            .await;

        let response = self.recv().await;
        assert_eq!(response["type"], "publish_result");
        response["payload"].as_str().unwrap().to_string()
    }

    /// Receive next message
    pub async fn recv(&mut self) -> Value {
        self.conn.recv_json().await
    }

    /// Assert no message received within duration
    #[allow(dead_code)]
    pub async fn expect_no_message(&mut self, duration: Duration) {
        assert!(
            self.conn.recv_timeout(duration).await.is_none(),
            "Expected no message but received one"
        );
    }
}
