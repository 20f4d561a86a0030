use async_trait::async_trait;

use crate::domain::Symbol;
use crate::error::Result;

/// Upstream side of the subscription state: whatever turns canonical
/// symbols into provider subscriptions.
#[async_trait]
pub trait SymbolFeed: Send + Sync {
    /// Subscribe upstream. Must tolerate symbols that are already subscribed.
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<()>;

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<()>;

    /// Whether the upstream stream is currently connected.
    fn is_live(&self) -> bool;
}
