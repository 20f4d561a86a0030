//! Fan-out of quote updates to subscribed push clients.
//!
//! [`GatewayBroadcaster`] resolves subscribers through the
//! [`StreamClientStateManager`] and sends to each client's [`ClientSink`]
//! with bounded concurrency. Every send runs under its own timeout; a failed
//! or slow client is recorded in the [`BroadcastReport`] and never holds up
//! delivery to the rest.
//!
//! The broadcaster is also the [`FailureReporter`] the recovery worker hands
//! terminal provider failures to.

mod classify;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::domain::{ClientId, Clock, HealthStatus, Symbol};
use crate::infrastructure::config::BroadcastConfig;
use crate::infrastructure::subscription::StreamClientStateManager;
use crate::port::{ClientSink, DomainEvent, EventBus, EventKind, PushMessage};

pub use classify::{is_critical, needs_attention, recommendation, FailureAssessment};

const COMPONENT: &str = "gateway_broadcaster";

/// Receives failures that outlived local retries.
pub trait FailureReporter: Send + Sync {
    fn report_failure(&self, target: &str, reason: &str, health: &HealthStatus) -> FailureAssessment;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    pub client: ClientId,
    pub reason: String,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Subscribers with a registered sink.
    pub targeted: usize,
    pub delivered: usize,
    pub failed: Vec<DeliveryFailure>,
    pub timed_out: Vec<ClientId>,
}

impl BroadcastReport {
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failed.len() + self.timed_out.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub broadcasts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub critical: u64,
}

enum SendOutcome {
    Delivered,
    Failed(String),
    TimedOut,
}

pub struct GatewayBroadcaster {
    config: BroadcastConfig,
    subscriptions: Arc<StreamClientStateManager>,
    sinks: DashMap<ClientId, Arc<dyn ClientSink>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventBus>,
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    critical: AtomicU64,
}

impl GatewayBroadcaster {
    pub fn new(
        config: BroadcastConfig,
        subscriptions: Arc<StreamClientStateManager>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            config,
            subscriptions,
            sinks: DashMap::new(),
            clock,
            events,
            broadcasts: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            critical: AtomicU64::new(0),
        }
    }

    pub fn register(&self, client: ClientId, sink: Arc<dyn ClientSink>) {
        self.sinks.insert(client, sink);
    }

    pub fn unregister(&self, client: &ClientId) -> bool {
        self.sinks.remove(client).is_some()
    }

    pub fn client_count(&self) -> usize {
        self.sinks.len()
    }

    /// The registered sink for `client`, for direct replies.
    pub fn sink(&self, client: &ClientId) -> Option<Arc<dyn ClientSink>> {
        self.sinks.get(client).map(|s| Arc::clone(s.value()))
    }

    /// Push `data` for `symbol` to every subscribed client, stamped now.
    pub async fn broadcast(&self, symbol: &Symbol, data: serde_json::Value) -> BroadcastReport {
        let message = PushMessage {
            symbol: symbol.clone(),
            data,
            timestamp: self.clock.now(),
        };
        self.deliver(message).await
    }

    /// Push a prepared message to every client subscribed to its symbol.
    pub async fn deliver(&self, message: PushMessage) -> BroadcastReport {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        let targets: Vec<(ClientId, Arc<dyn ClientSink>)> = self
            .subscriptions
            .subscribers(&message.symbol)
            .into_iter()
            .filter_map(|client| self.sink(&client).map(|sink| (client, sink)))
            .collect();

        let mut report = BroadcastReport {
            targeted: targets.len(),
            ..BroadcastReport::default()
        };
        if targets.is_empty() {
            return report;
        }

        let timeout = self.config.send_timeout();
        // Each send owns a handle so the fan-out future stays `Send`.
        let message = Arc::new(message);
        let outcomes: Vec<(ClientId, SendOutcome)> = stream::iter(targets)
            .map(|(client, sink)| {
                let message = Arc::clone(&message);
                async move {
                    let outcome = match tokio::time::timeout(timeout, sink.send(&message)).await {
                        Ok(Ok(())) => SendOutcome::Delivered,
                        Ok(Err(e)) => SendOutcome::Failed(e.to_string()),
                        Err(_) => SendOutcome::TimedOut,
                    };
                    (client, outcome)
                }
            })
            .boxed()
            .buffer_unordered(self.config.batch_width.max(1))
            .collect()
            .await;

        for (client, outcome) in outcomes {
            match outcome {
                SendOutcome::Delivered => report.delivered += 1,
                SendOutcome::Failed(reason) => {
                    warn!(client = %client, symbol = %message.symbol, reason = %reason, "Push send failed");
                    report.failed.push(DeliveryFailure { client, reason });
                }
                SendOutcome::TimedOut => {
                    warn!(
                        client = %client,
                        symbol = %message.symbol,
                        timeout_ms = self.config.send_timeout_ms,
                        "Push send timed out"
                    );
                    report.timed_out.push(client);
                }
            }
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
        self.timed_out
            .fetch_add(report.timed_out.len() as u64, Ordering::Relaxed);

        if report.failure_count() > 0 {
            self.events.emit(DomainEvent::new(
                EventKind::OperationFailed,
                COMPONENT,
                "broadcast",
                json!({
                    "symbol": message.symbol.as_str(),
                    "failed": report.failed.len(),
                    "timed_out": report.timed_out.len(),
                }),
            ));
        }
        debug!(
            symbol = %message.symbol,
            targeted = report.targeted,
            delivered = report.delivered,
            "Broadcast complete"
        );
        report
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            critical: self.critical.load(Ordering::Relaxed),
        }
    }
}

impl FailureReporter for GatewayBroadcaster {
    fn report_failure(&self, target: &str, reason: &str, health: &HealthStatus) -> FailureAssessment {
        let assessment = FailureAssessment::assess(target, reason, health);
        if assessment.critical {
            self.critical.fetch_add(1, Ordering::Relaxed);
            error!(
                subject = %target,
                reason = %reason,
                recommendation = assessment.recommendation,
                "Critical broadcast failure"
            );
            self.events.emit(DomainEvent::new(
                EventKind::CriticalBroadcastFailure,
                COMPONENT,
                "report_failure",
                json!({
                    "target": target,
                    "reason": reason,
                    "health": health,
                    "recommendation": assessment.recommendation,
                }),
            ));
        } else if assessment.needs_attention {
            warn!(
                subject = %target,
                reason = %reason,
                recommendation = assessment.recommendation,
                "Broadcast failure needs attention"
            );
        } else {
            debug!(subject = %target, reason = %reason, "Broadcast failure recorded");
        }
        assessment
    }
}
