//! Domain event port consumed by the external monitoring collaborator.
//!
//! Components publish [`DomainEvent`]s through an [`EventBus`]; what happens
//! to them (metrics, alerting, audit) is outside this crate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kinds of events the gateway emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CacheHit,
    CacheMiss,
    OperationStarted,
    OperationCompleted,
    OperationFailed,
    RateLimitExceeded,
    ProviderUnavailable,
    CriticalBroadcastFailure,
}

/// An observable occurrence, with enough context to act on it.
#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    /// Operation that produced the event (`acquire`, `get`, `broadcast`, ...).
    pub operation: &'static str,
    /// Component identifier (`connection_pool`, `symbol_mapper`, ...).
    pub component: &'static str,
    /// Contextual payload: symbol, key, reason.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        kind: EventKind,
        component: &'static str,
        operation: &'static str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            operation,
            component,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Handler registered through [`EventBus::on`].
pub type EventHandler = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Publish/subscribe interface for domain events.
///
/// `emit` must never block the caller; implementations drop or buffer rather
/// than wait on slow consumers.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: DomainEvent);

    /// Register `handler` for events of `kind`.
    fn on(&self, kind: EventKind, handler: EventHandler);
}

/// An event bus that discards everything.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _event: DomainEvent) {}

    fn on(&self, _kind: EventKind, _handler: EventHandler) {}
}
