//! WebSocket module bridging browser clients to the broker

mod connection;

pub use connection::{WsSink, WsSource, ws_handler};
