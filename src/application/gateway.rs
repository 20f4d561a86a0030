//! Push-channel connection handler.
//!
//! [`Gateway`] implements the transport-neutral [`ConnectionHandler`]: it
//! rate-limits each client's frames, applies subscribe/unsubscribe actions
//! to the shared subscription state and registers the client's sink with the
//! broadcaster. Provider updates flow the other way through
//! [`Gateway::spawn_update_pump`], which maps provider codes back to
//! canonical symbols before fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{ClientId, Clock, Symbol};
use crate::error::Result;
use crate::infrastructure::broadcast::GatewayBroadcaster;
use crate::infrastructure::cache::SymbolMapperCache;
use crate::infrastructure::provider::ProviderUpdate;
use crate::infrastructure::rate_limit::RateLimiter;
use crate::infrastructure::subscription::StreamClientStateManager;
use crate::port::{Action, ClientMessage, ClientSink, ConnectionHandler, PushMessage};

use super::quote::QuoteService;

pub struct Gateway {
    subscriptions: Arc<StreamClientStateManager>,
    broadcaster: Arc<GatewayBroadcaster>,
    mapper: SymbolMapperCache,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    snapshots: Option<Arc<QuoteService>>,
}

impl Gateway {
    pub fn new(
        subscriptions: Arc<StreamClientStateManager>,
        broadcaster: Arc<GatewayBroadcaster>,
        mapper: SymbolMapperCache,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            broadcaster,
            mapper,
            limiter,
            clock,
            snapshots: None,
        }
    }

    /// Send each newly subscribed client a snapshot of the requested symbols.
    #[must_use]
    pub fn with_snapshots(mut self, quotes: Arc<QuoteService>) -> Self {
        self.snapshots = Some(quotes);
        self
    }

    /// Forward provider updates to subscribed clients until the channel
    /// closes or `shutdown` flips.
    pub fn spawn_update_pump(
        self: &Arc<Self>,
        mut updates: mpsc::Receiver<ProviderUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(update) => gateway.forward(update).await,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Update pump stopped");
        })
    }

    /// Map one provider update to its canonical symbol and fan it out.
    pub async fn forward(&self, update: ProviderUpdate) {
        let code = update.quote.symbol;
        let symbol = self
            .mapper
            .get_canonical(&update.provider, &code)
            .await
            .into_mapping()
            .map_or_else(|| Symbol::new(code.clone()), |m| m.canonical);

        let report = self
            .broadcaster
            .deliver(PushMessage {
                symbol,
                data: update.quote.data,
                timestamp: update.quote.timestamp,
            })
            .await;
        if report.targeted == 0 {
            debug!(provider = %update.provider, code = %code, "Update with no subscribers");
        }
    }

    async fn send_snapshots(&self, client: &ClientId, symbols: &[Symbol]) {
        let (Some(quotes), Some(sink)) = (&self.snapshots, self.broadcaster.sink(client)) else {
            return;
        };
        for symbol in symbols {
            match quotes.snapshot(symbol).await {
                Ok(data) => {
                    let message = PushMessage {
                        symbol: symbol.clone(),
                        data,
                        timestamp: self.clock.now(),
                    };
                    if let Err(e) = sink.send(&message).await {
                        debug!(client = %client, error = %e, "Snapshot send failed");
                        return;
                    }
                }
                Err(e) => debug!(client = %client, symbol = %symbol, error = %e, "Snapshot unavailable"),
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for Gateway {
    async fn on_connect(&self, client: ClientId, sink: Arc<dyn ClientSink>) {
        info!(client = %client, "Client connected");
        self.broadcaster.register(client, sink);
    }

    async fn on_message(&self, client: &ClientId, text: &str) -> Result<Vec<Symbol>> {
        let key = format!("client:{client}");
        self.limiter.check(&key).await?.into_result(&key)?;

        let message = ClientMessage::parse(text).map_err(|e| {
            warn!(client = %client, error = %e, "Rejected client frame");
            e
        })?;

        match message.action {
            Action::Subscribe => {
                let added = self.subscriptions.subscribe(client, &message.symbols).await;
                debug!(client = %client, requested = message.symbols.len(), added = added.len(), "Subscribe");
                self.send_snapshots(client, &message.symbols).await;
                Ok(added)
            }
            Action::Unsubscribe => {
                let released = self.subscriptions.unsubscribe(client, &message.symbols).await;
                debug!(client = %client, released = released.len(), "Unsubscribe");
                Ok(released)
            }
        }
    }

    async fn on_close(&self, client: &ClientId) {
        self.broadcaster.unregister(client);
        self.subscriptions.on_client_disconnect(client).await;
        info!(client = %client, "Client disconnected");
    }
}
