//! In-process event bus.
//!
//! Events go to registered per-kind handlers synchronously and to any
//! number of async subscribers through a bounded broadcast channel. A slow
//! subscriber lags and loses events; it never blocks an emitter.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::port::{DomainEvent, EventBus, EventHandler, EventKind};

pub struct ChannelEventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
    tx: broadcast::Sender<DomainEvent>,
}

impl ChannelEventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Receive every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl EventBus for ChannelEventBus {
    fn emit(&self, event: DomainEvent) {
        trace!(kind = ?event.kind, component = event.component, operation = event.operation, "Event");

        if let Some(handlers) = self.handlers.read().get(&event.kind) {
            for handler in handlers {
                handler(&event);
            }
        }
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    fn on(&self, kind: EventKind, handler: EventHandler) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn event(kind: EventKind) -> DomainEvent {
        DomainEvent::new(kind, "test", "emit", json!({}))
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let bus = ChannelEventBus::new(8);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.on(
            EventKind::CacheHit,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.emit(event(EventKind::CacheHit));
        bus.emit(event(EventKind::CacheMiss));
        bus.emit(event(EventKind::CacheHit));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = ChannelEventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(event(EventKind::ProviderUnavailable));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::ProviderUnavailable);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = ChannelEventBus::new(1);
        bus.emit(event(EventKind::OperationFailed));
    }
}
