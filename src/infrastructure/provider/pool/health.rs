//! Health checks and idle reaping.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::PooledConnection;
use super::{close_client, ConnectionPoolManager, COMPONENT};
use crate::domain::{ConnectionId, ConnectionState, ProviderId};
use crate::port::{DomainEvent, EventKind, ProviderClient};

/// Outcome of one health pass over a provider's connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    pub failed: usize,
    pub degraded: usize,
    pub reaped: usize,
}

impl ConnectionPoolManager {
    /// Background task pinging `provider`'s connections every
    /// `health_check_interval` until `shutdown` flips.
    pub fn spawn_health_task(
        self: &Arc<Self>,
        provider: ProviderId,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.config.health_check_interval());
            interval.tick().await;
            debug!(provider = %provider, "Health task started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = pool.check_health(&provider).await;
                        if report.failed > 0 || report.reaped > 0 {
                            debug!(
                                provider = %provider,
                                checked = report.checked,
                                failed = report.failed,
                                degraded = report.degraded,
                                reaped = report.reaped,
                                "Health pass"
                            );
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!(provider = %provider, "Health task stopped");
        })
    }

    /// Ping every `CONNECTED` connection of `provider` once, then reap idle
    /// connections past the idle timeout.
    pub async fn check_health(&self, provider: &ProviderId) -> HealthReport {
        let targets: Vec<(ConnectionId, Arc<dyn ProviderClient>)> = {
            let state = self.state.lock();
            state
                .connections
                .values()
                .filter(|c| &c.provider == provider && c.state == ConnectionState::Connected)
                .map(|c| (c.id, Arc::clone(&c.client)))
                .collect()
        };

        let timeout = self.config.ping_timeout();
        let pings = targets.iter().map(|(id, client)| async move {
            let ok = matches!(tokio::time::timeout(timeout, client.ping()).await, Ok(Ok(())));
            (*id, ok)
        });
        let results = futures_util::future::join_all(pings).await;

        let mut report = HealthReport {
            checked: results.len(),
            ..HealthReport::default()
        };
        for (id, ok) in results {
            if !ok {
                report.failed += 1;
            }
            if self.record_health(id, ok) {
                report.degraded += 1;
            }
        }
        report.reaped = self.reap_idle(provider).await;
        report
    }

    /// Record a health observation. Returns `true` if this observation
    /// moved the connection to `DEGRADED`.
    pub(super) fn record_health(&self, id: ConnectionId, ok: bool) -> bool {
        let now = self.clock.now();
        let threshold = self.config.failure_threshold;
        let mut state = self.state.lock();
        let Some(conn) = state.connections.get_mut(&id) else {
            return false;
        };
        conn.last_health_check_at = Some(now);

        if ok {
            conn.consecutive_failures = 0;
            return false;
        }

        conn.consecutive_failures += 1;
        self.counters.health_failures.fetch_add(1, Ordering::Relaxed);
        if conn.consecutive_failures < threshold || !conn.transition(ConnectionState::Degraded) {
            return false;
        }

        warn!(
            provider = %conn.provider,
            connection = %id,
            failures = conn.consecutive_failures,
            "Connection degraded"
        );
        self.events.emit(DomainEvent::new(
            EventKind::OperationFailed,
            COMPONENT,
            "health_check",
            json!({
                "provider": conn.provider.as_str(),
                "connection": id.value(),
                "consecutive_failures": conn.consecutive_failures,
            }),
        ));
        true
    }

    async fn reap_idle(&self, provider: &ProviderId) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let now = Instant::now();
        let reaped: Vec<PooledConnection> = {
            let mut state = self.state.lock();
            let expired: Vec<ConnectionId> = state
                .connections
                .values()
                .filter(|c| &c.provider == provider && c.is_idle())
                .filter(|c| c.idle_since.is_some_and(|at| now.duration_since(at) >= idle_timeout))
                .map(|c| c.id)
                .collect();
            expired
                .iter()
                .filter_map(|id| state.connections.remove(id))
                .collect()
        };

        for conn in &reaped {
            close_client(conn, self.config.call_timeout()).await;
            info!(provider = %provider, connection = %conn.id, "Closed idle connection");
        }
        self.counters
            .reaped
            .fetch_add(reaped.len() as u64, Ordering::Relaxed);
        reaped.len()
    }
}
