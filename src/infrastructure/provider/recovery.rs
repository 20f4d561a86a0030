//! Background repair of degraded provider connections.
//!
//! The worker scans the pool on a fixed interval. Each `DEGRADED` connection
//! is claimed (`→ RECONNECTING`) and reconnected with exponential backoff,
//! `base_delay × 2^attempt` capped at `max_delay`, for at most `max_retries`
//! attempts. A recovered stream connection gets the full active symbol set
//! replayed; the pool skips codes the new session already carries, so no
//! symbol is subscribed twice.
//!
//! When retries run out the connection is closed, the provider is marked
//! unavailable for the pool's cooldown and the failure is handed to the
//! [`FailureReporter`] as critical.
//!
//! Recovery runs on its own task and never blocks request-path callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ConnectionPoolManager, DegradedConnection};
use crate::domain::HealthStatus;
use crate::infrastructure::broadcast::FailureReporter;
use crate::infrastructure::config::RecoveryConfig;
use crate::infrastructure::subscription::StreamClientStateManager;
use crate::port::{DomainEvent, EventBus, EventKind};

const COMPONENT: &str = "stream_recovery";

/// How one connection's recovery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered { attempts: u32 },
    GaveUp { attempts: u32 },
    /// Shutdown arrived during backoff; the connection is back in `DEGRADED`.
    Interrupted,
}

/// Summary of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub degraded: usize,
    pub recovered: usize,
    pub gave_up: usize,
    pub interrupted: usize,
    /// Symbols re-sent because the feed was found not live.
    pub rearmed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    pub attempts: u64,
    pub recovered: u64,
    pub gave_up: u64,
    pub replays: u64,
}

pub struct StreamRecoveryWorker {
    config: RecoveryConfig,
    pool: Arc<ConnectionPoolManager>,
    subscriptions: Arc<StreamClientStateManager>,
    reporter: Arc<dyn FailureReporter>,
    events: Arc<dyn EventBus>,
    attempts: AtomicU64,
    recovered: AtomicU64,
    gave_up: AtomicU64,
    replays: AtomicU64,
}

impl StreamRecoveryWorker {
    pub fn new(
        config: RecoveryConfig,
        pool: Arc<ConnectionPoolManager>,
        subscriptions: Arc<StreamClientStateManager>,
        reporter: Arc<dyn FailureReporter>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            config,
            pool,
            subscriptions,
            reporter,
            events,
            attempts: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
            gave_up: AtomicU64::new(0),
            replays: AtomicU64::new(0),
        }
    }

    /// Scan every `scan_interval` until `shutdown` flips to `true`.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut stop = shutdown.clone();
            let mut interval = tokio::time::interval(worker.config.scan_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                max_retries = worker.config.max_retries,
                scan_ms = worker.config.scan_interval_ms,
                "Stream recovery worker started"
            );
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = worker.scan(&shutdown).await;
                        if report.degraded > 0 || report.rearmed > 0 {
                            debug!(
                                degraded = report.degraded,
                                recovered = report.recovered,
                                gave_up = report.gave_up,
                                rearmed = report.rearmed,
                                "Recovery scan"
                            );
                        }
                    }
                    () = shutdown_requested(&mut stop) => break,
                }
            }
            info!("Stream recovery worker stopped");
        })
    }

    /// One pass: recover every degraded connection concurrently, then re-arm
    /// the feed if symbols are wanted but no stream is live.
    pub async fn scan(&self, shutdown: &watch::Receiver<bool>) -> ScanReport {
        let claimed: Vec<DegradedConnection> = self
            .pool
            .degraded_connections()
            .into_iter()
            .filter(|conn| self.pool.begin_reconnect(conn.id))
            .collect();

        let mut report = ScanReport {
            degraded: claimed.len(),
            ..ScanReport::default()
        };

        let recoveries = claimed
            .into_iter()
            .map(|conn| self.recover(conn, shutdown.clone()));
        for outcome in futures_util::future::join_all(recoveries).await {
            match outcome {
                RecoveryOutcome::Recovered { .. } => report.recovered += 1,
                RecoveryOutcome::GaveUp { .. } => report.gave_up += 1,
                RecoveryOutcome::Interrupted => report.interrupted += 1,
            }
        }

        if report.degraded == 0 && self.subscriptions.needs_rearm() {
            report.rearmed = self.rearm().await;
        }
        report
    }

    /// Reconnect a claimed (`RECONNECTING`) connection.
    pub async fn recover(
        &self,
        conn: DegradedConnection,
        mut shutdown: watch::Receiver<bool>,
    ) -> RecoveryOutcome {
        let mut last_error = String::from("no attempt made");

        for attempt in 0..self.config.max_retries {
            let delay = self.config.backoff_delay(attempt);
            debug!(
                provider = %conn.provider,
                connection = %conn.id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after delay"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown_requested(&mut shutdown) => {
                    self.pool.abandon_reconnect(conn.id);
                    info!(connection = %conn.id, "Recovery interrupted by shutdown");
                    return RecoveryOutcome::Interrupted;
                }
            }

            self.attempts.fetch_add(1, Ordering::Relaxed);
            match self.pool.reconnect(conn.id).await {
                Ok(()) => {
                    self.recovered.fetch_add(1, Ordering::Relaxed);
                    if conn.stream {
                        self.replay(&conn).await;
                    }
                    self.events.emit(DomainEvent::new(
                        EventKind::OperationCompleted,
                        COMPONENT,
                        "reconnect",
                        json!({
                            "provider": conn.provider.as_str(),
                            "connection": conn.id.value(),
                            "attempts": attempt + 1,
                        }),
                    ));
                    return RecoveryOutcome::Recovered {
                        attempts: attempt + 1,
                    };
                }
                Err(e) => {
                    warn!(
                        provider = %conn.provider,
                        connection = %conn.id,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        self.give_up(&conn, &last_error).await;
        RecoveryOutcome::GaveUp {
            attempts: self.config.max_retries,
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            gave_up: self.gave_up.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
        }
    }

    async fn replay(&self, conn: &DegradedConnection) {
        match self.subscriptions.replay().await {
            Ok(count) => {
                self.replays.fetch_add(1, Ordering::Relaxed);
                info!(provider = %conn.provider, symbols = count, "Subscriptions replayed after reconnect");
            }
            Err(e) => {
                warn!(provider = %conn.provider, error = %e, "Replay after reconnect failed");
            }
        }
    }

    async fn rearm(&self) -> usize {
        match self.subscriptions.replay().await {
            Ok(count) => {
                self.replays.fetch_add(1, Ordering::Relaxed);
                info!(symbols = count, "Stream feed re-armed");
                count
            }
            Err(e) => {
                debug!(error = %e, "Stream feed re-arm deferred");
                0
            }
        }
    }

    async fn give_up(&self, conn: &DegradedConnection, last_error: &str) {
        self.gave_up.fetch_add(1, Ordering::Relaxed);
        self.pool.mark_closed(conn.id).await;
        self.pool.mark_provider_unavailable(&conn.provider);

        let reason = format!(
            "reconnect failed after {} attempts: {last_error}",
            self.config.max_retries
        );

        self.events.emit(DomainEvent::new(
            EventKind::ProviderUnavailable,
            COMPONENT,
            "reconnect",
            json!({
                "provider": conn.provider.as_str(),
                "credential": conn.credential.as_str(),
                "reason": reason,
            }),
        ));
        let health = HealthStatus::unhealthy().with_detail(format!("{} closed", conn.id));
        let assessment = self
            .reporter
            .report_failure(conn.provider.as_str(), &reason, &health);
        match assessment.into_error() {
            Some(err) => error!(
                provider = %conn.provider,
                connection = %conn.id,
                error = %err,
                "Recovery gave up, provider marked unavailable"
            ),
            None => warn!(
                provider = %conn.provider,
                connection = %conn.id,
                reason = %reason,
                "Recovery gave up, provider marked unavailable"
            ),
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{ClientId, ConnectionState, CredentialId, ProviderId, Symbol, SystemClock};
    use crate::infrastructure::broadcast::GatewayBroadcaster;
    use crate::infrastructure::cache::SymbolMapperCache;
    use crate::infrastructure::provider::ProviderFeed;
    use crate::port::NullEventBus;
    use crate::testkit;
    use crate::testkit::events::RecordingEventBus;
    use crate::testkit::provider::ProviderScript;
    use crate::testkit::store::ScriptedRuleRepository;

    struct Fixture {
        pool: Arc<ConnectionPoolManager>,
        subscriptions: Arc<StreamClientStateManager>,
        worker: Arc<StreamRecoveryWorker>,
        script: Arc<ProviderScript>,
        events: Arc<RecordingEventBus>,
        shutdown: watch::Sender<bool>,
    }

    fn fixture(max_retries: u32) -> Fixture {
        let script = ProviderScript::new();
        let events = Arc::new(RecordingEventBus::new());
        let clock = Arc::new(SystemClock);
        let pool = Arc::new(ConnectionPoolManager::new(
            testkit::config::pool(8, 4),
            script.factory(),
            clock.clone(),
            Arc::new(NullEventBus),
        ));
        let mapper = SymbolMapperCache::new(
            testkit::config::cache(),
            Arc::new(ScriptedRuleRepository::new()),
            clock.clone(),
            Arc::new(NullEventBus),
        );
        let feed = ProviderFeed::new(
            Arc::clone(&pool),
            mapper,
            ProviderId::new("alpha"),
            CredentialId::new("key-1"),
        );
        let subscriptions = Arc::new(StreamClientStateManager::new(Arc::new(feed)));
        let broadcaster = Arc::new(GatewayBroadcaster::new(
            testkit::config::broadcast(4),
            Arc::clone(&subscriptions),
            clock,
            events.clone(),
        ));
        let worker = Arc::new(StreamRecoveryWorker::new(
            testkit::config::recovery(max_retries),
            Arc::clone(&pool),
            Arc::clone(&subscriptions),
            broadcaster,
            events.clone(),
        ));
        let (shutdown, _) = watch::channel(false);
        Fixture {
            pool,
            subscriptions,
            worker,
            script,
            events,
            shutdown,
        }
    }

    async fn degrade_stream(f: &Fixture, symbols: &[&str]) {
        let symbols: Vec<Symbol> = symbols.iter().map(|s| Symbol::new(*s)).collect();
        f.subscriptions
            .subscribe(&ClientId::new("client"), &symbols)
            .await;
        f.script.set_ping_down(true);
        f.pool.check_health(&ProviderId::new("alpha")).await;
        f.script.set_ping_down(false);
        f.script.clear_calls();
    }

    #[tokio::test]
    async fn recovered_stream_replays_each_symbol_once() {
        let f = fixture(3);
        degrade_stream(&f, &["AAPL", "MSFT"]).await;
        f.script.fail_next_connects(1);

        let report = f.worker.scan(&f.shutdown.subscribe()).await;

        assert_eq!((report.degraded, report.recovered), (1, 1));
        assert_eq!(f.worker.stats().attempts, 2);
        assert_eq!(f.script.subscribe_count("AAPL"), 1);
        assert_eq!(f.script.subscribe_count("MSFT"), 1);
        assert!(f.pool.has_live_stream(&ProviderId::new("alpha"), &CredentialId::new("key-1")));

        // A second replay finds everything already subscribed.
        f.subscriptions.replay().await.unwrap();
        assert_eq!(f.script.subscribe_calls().len(), 2);
    }

    #[tokio::test]
    async fn attempts_never_exceed_max_retries() {
        let f = fixture(3);
        degrade_stream(&f, &["AAPL"]).await;
        let stream = f
            .pool
            .stream_connection(&ProviderId::new("alpha"), &CredentialId::new("key-1"))
            .unwrap();
        let connects_before = f.script.connect_count();
        f.script.set_connect_down(true);

        let report = f.worker.scan(&f.shutdown.subscribe()).await;

        assert_eq!(report.gave_up, 1);
        assert_eq!(f.worker.stats().attempts, 3);
        assert_eq!(f.script.connect_count() - connects_before, 3);
        assert_eq!(f.pool.connection_state(stream), None);
        assert!(!f.pool.is_provider_available(&ProviderId::new("alpha")));
        assert_eq!(f.events.count(EventKind::ProviderUnavailable), 1);
        assert_eq!(f.events.count(EventKind::CriticalBroadcastFailure), 1);
        assert!(f.script.subscribe_calls().is_empty());
    }

    #[tokio::test]
    async fn hung_connect_counts_as_failed_attempt() {
        let f = fixture(3);
        degrade_stream(&f, &["AAPL"]).await;
        f.script.set_connect_delay(Duration::from_secs(3600));

        let report = tokio::time::timeout(
            Duration::from_secs(3),
            f.worker.scan(&f.shutdown.subscribe()),
        )
        .await
        .expect("scan finishes despite a hanging provider");

        assert_eq!(report.gave_up, 1);
        assert_eq!(f.worker.stats().attempts, 3);
        assert!(!f.pool.is_provider_available(&ProviderId::new("alpha")));
        assert_eq!(f.events.count(EventKind::CriticalBroadcastFailure), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let f = fixture(10);
        degrade_stream(&f, &["AAPL"]).await;
        let stream = f
            .pool
            .stream_connection(&ProviderId::new("alpha"), &CredentialId::new("key-1"))
            .unwrap();
        f.script.set_connect_down(true);

        let rx = f.shutdown.subscribe();
        let worker = Arc::clone(&f.worker);
        let scan = tokio::spawn(async move { worker.scan(&rx).await });
        tokio::time::sleep(Duration::from_millis(25)).await;
        f.shutdown.send(true).unwrap();

        let report = scan.await.unwrap();
        assert_eq!(report.interrupted, 1);
        assert_eq!(f.pool.connection_state(stream), Some(ConnectionState::Degraded));
        assert!(f.worker.stats().attempts < 10);
    }

    #[tokio::test]
    async fn idle_feed_is_rearmed() {
        let f = fixture(3);
        f.script.fail_next_connects(1);
        f.subscriptions
            .subscribe(&ClientId::new("client"), &[Symbol::new("AAPL")])
            .await;
        assert!(f.subscriptions.needs_rearm());

        let report = f.worker.scan(&f.shutdown.subscribe()).await;

        assert_eq!((report.degraded, report.rearmed), (0, 1));
        assert_eq!(f.script.subscribe_count("AAPL"), 1);
        assert!(!f.subscriptions.needs_rearm());
    }

    #[tokio::test]
    async fn spawned_worker_stops_on_shutdown() {
        let f = fixture(3);
        let handle = f.worker.spawn(f.shutdown.subscribe());
        f.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
