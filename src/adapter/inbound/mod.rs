//! Inbound adapters (driving side).

pub mod websocket;

pub use websocket::WebSocketServer;
