//! Push-channel protocol and the transport-neutral connection handler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ClientId, Symbol};
use crate::error::{Result, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

/// Inbound frame: `{"action": "subscribe"|"unsubscribe", "symbols": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub action: Action,
    pub symbols: Vec<Symbol>,
}

#[derive(Deserialize)]
struct RawClientMessage {
    action: Option<Action>,
    symbols: Option<Vec<String>>,
}

impl ClientMessage {
    /// Parse and validate a text frame.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MalformedMessage`] for non-JSON input or an unknown action
    /// - [`ValidationError::MissingField`] when `action` or `symbols` is absent
    /// - [`ValidationError::InvalidSymbol`] for the first bad symbol
    pub fn parse(text: &str) -> std::result::Result<Self, ValidationError> {
        let raw: RawClientMessage =
            serde_json::from_str(text).map_err(|e| ValidationError::MalformedMessage {
                reason: e.to_string(),
            })?;

        let action = raw
            .action
            .ok_or(ValidationError::MissingField { field: "action" })?;
        let symbols = raw
            .symbols
            .ok_or(ValidationError::MissingField { field: "symbols" })?
            .iter()
            .map(|s| Symbol::parse(s))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { action, symbols })
    }
}

/// Outbound push frame: `{"symbol", "data", "timestamp"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub symbol: Symbol,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-client outbound channel owned by the transport.
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<()>;
}

/// Transport-independent connection lifecycle hooks.
///
/// A transport (WebSocket server, test harness) assigns each connection a
/// [`ClientId`], hands over a [`ClientSink`] on connect, forwards every text
/// frame to `on_message` and calls `on_close` exactly once.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn on_connect(&self, client: ClientId, sink: std::sync::Arc<dyn ClientSink>);

    /// Returns the symbols whose upstream subscription changed.
    async fn on_message(&self, client: &ClientId, text: &str) -> Result<Vec<Symbol>>;

    async fn on_close(&self, client: &ClientId);
}
