//! Per-request cache strategy selection.
//!
//! The orchestrator maps a [`DataClassification`] and the current
//! [`MarketSession`] to a [`CacheStrategy`] and a TTL:
//!
//! | Classification | Strategy |
//! |----------------|----------|
//! | realtime quote | strong timeliness while open, market-aware otherwise |
//! | intraday       | market-aware |
//! | reference      | weak timeliness |
//! | fundamental    | adaptive |
//! | sensitive      | no cache |
//!
//! Resource pressure stretches TTLs (`×m` when elevated, `×m²` when
//! critical) to shed backend load. Once the observed backend error rate
//! passes the configured threshold, every cacheable strategy falls back to
//! the configured fallback.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{
    CacheStrategy, Clock, DataClassification, MarketSession, PressureLevel, ResourcePressure,
};
use crate::error::Result;
use crate::infrastructure::cache::{LruTier, Tier};
use crate::infrastructure::config::StrategyConfig;
use crate::port::{DomainEvent, EventBus, EventKind, MarketSessionSource, PressureSource};

const COMPONENT: &str = "cache_orchestrator";

/// Recent outcomes kept for rate estimates.
const WINDOW: usize = 256;

/// Ephemeral per-request decision; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStrategyDecision {
    pub strategy: CacheStrategy,
    pub ttl: Duration,
    /// The backend error rate forced the fallback strategy.
    pub degraded: bool,
    pub pressure: PressureLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub hit_rate: f64,
    pub error_rate: f64,
    pub lookups: usize,
    pub fetches: usize,
    pub cached_values: usize,
}

#[derive(Default)]
struct Outcomes {
    /// `true` for a hit.
    lookups: VecDeque<bool>,
    /// `true` for a failed backend fetch.
    fetches: VecDeque<bool>,
}

fn push_bounded(ring: &mut VecDeque<bool>, value: bool) {
    if ring.len() == WINDOW {
        ring.pop_front();
    }
    ring.push_back(value);
}

fn rate(ring: &VecDeque<bool>) -> f64 {
    if ring.is_empty() {
        return 0.0;
    }
    ring.iter().filter(|v| **v).count() as f64 / ring.len() as f64
}

pub struct SmartCacheOrchestrator {
    config: StrategyConfig,
    sessions: Arc<dyn MarketSessionSource>,
    events: Arc<dyn EventBus>,
    values: LruTier<String, serde_json::Value>,
    pressure: RwLock<ResourcePressure>,
    outcomes: Mutex<Outcomes>,
}

impl SmartCacheOrchestrator {
    pub fn new(
        config: StrategyConfig,
        sessions: Arc<dyn MarketSessionSource>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        let values = LruTier::with_tier(
            config.value_cache_capacity,
            Duration::from_secs(config.adaptive_base_ttl_secs),
            Tier::L1,
            clock,
        );
        Self {
            config,
            sessions,
            events,
            values,
            pressure: RwLock::new(ResourcePressure::default()),
            outcomes: Mutex::new(Outcomes::default()),
        }
    }

    /// Strategy for a classification in a given session, before degradation.
    #[must_use]
    pub const fn select_strategy(
        classification: DataClassification,
        session: MarketSession,
    ) -> CacheStrategy {
        match classification {
            DataClassification::RealtimeQuote if session.is_open() => {
                CacheStrategy::StrongTimeliness
            }
            DataClassification::RealtimeQuote | DataClassification::Intraday => {
                CacheStrategy::MarketAware
            }
            DataClassification::Reference => CacheStrategy::WeakTimeliness,
            DataClassification::Fundamental => CacheStrategy::Adaptive,
            DataClassification::Sensitive => CacheStrategy::NoCache,
        }
    }

    /// Strategy and TTL for `classification` right now.
    pub fn decide(&self, classification: DataClassification) -> CacheStrategyDecision {
        let session = self.sessions.current_session();
        let selected = Self::select_strategy(classification, session);
        let degraded = selected != CacheStrategy::NoCache && self.backend_failing();
        let strategy = if degraded {
            self.config.fallback_strategy
        } else {
            selected
        };
        let pressure = self.pressure.read().worst();
        let ttl = self.stretch(self.base_ttl(strategy, session), pressure);

        CacheStrategyDecision {
            strategy,
            ttl,
            degraded,
            pressure,
        }
    }

    /// Serve `key` from the value cache, or run `fetch` and cache its result
    /// under the TTL the current decision yields.
    ///
    /// # Errors
    ///
    /// Propagates the error from `fetch`; failures are not cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        classification: DataClassification,
        fetch: F,
    ) -> Result<serde_json::Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        let decision = self.decide(classification);

        if decision.strategy != CacheStrategy::NoCache {
            if let Some(entry) = self.values.get(&key.to_string()) {
                self.record_lookup(true);
                self.emit(EventKind::CacheHit, key, &decision);
                return Ok(entry.value);
            }
            self.record_lookup(false);
            self.emit(EventKind::CacheMiss, key, &decision);
        }

        let result = fetch().await;
        self.record_fetch(result.is_ok());
        let value = result?;

        if decision.strategy != CacheStrategy::NoCache && !decision.ttl.is_zero() {
            self.values
                .insert_with_ttl(key.to_string(), value.clone(), decision.ttl);
        }
        debug!(key, strategy = %decision.strategy, ttl_ms = decision.ttl.as_millis() as u64, "Fetched through orchestrator");
        Ok(value)
    }

    /// Latest host pressure. Critical memory pressure also drops cached values.
    pub fn set_pressure(&self, pressure: ResourcePressure) {
        let previous = std::mem::replace(&mut *self.pressure.write(), pressure);
        if previous != pressure {
            info!(memory = %pressure.memory, cpu = %pressure.cpu, "Resource pressure changed");
        }
        if pressure.memory == PressureLevel::Critical {
            let evicted = self.values.evict_fraction(0.5);
            debug!(evicted, "Value cache trimmed under memory pressure");
        }
    }

    /// Re-read `source` every `every` and apply it until `shutdown` flips.
    pub fn spawn_pressure_feed(
        self: &Arc<Self>,
        source: Arc<dyn PressureSource>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => orchestrator.set_pressure(source.pressure()),
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Pressure feed stopped");
        })
    }

    pub fn record_lookup(&self, hit: bool) {
        push_bounded(&mut self.outcomes.lock().lookups, hit);
    }

    pub fn record_fetch(&self, ok: bool) {
        push_bounded(&mut self.outcomes.lock().fetches, !ok);
    }

    pub fn stats(&self) -> OrchestratorStats {
        let outcomes = self.outcomes.lock();
        OrchestratorStats {
            hit_rate: rate(&outcomes.lookups),
            error_rate: rate(&outcomes.fetches),
            lookups: outcomes.lookups.len(),
            fetches: outcomes.fetches.len(),
            cached_values: self.values.len(),
        }
    }

    fn backend_failing(&self) -> bool {
        let outcomes = self.outcomes.lock();
        outcomes.fetches.len() as u64 >= self.config.min_samples
            && rate(&outcomes.fetches) > self.config.error_rate_threshold
    }

    fn base_ttl(&self, strategy: CacheStrategy, session: MarketSession) -> Duration {
        match strategy {
            CacheStrategy::StrongTimeliness => Duration::from_secs(self.config.strong_ttl_secs),
            CacheStrategy::WeakTimeliness => Duration::from_secs(self.config.weak_ttl_secs),
            CacheStrategy::MarketAware if session.is_open() => {
                Duration::from_secs(self.config.market_open_ttl_secs)
            }
            CacheStrategy::MarketAware => Duration::from_secs(self.config.market_closed_ttl_secs),
            CacheStrategy::NoCache => Duration::ZERO,
            CacheStrategy::Adaptive => self.adaptive_ttl(),
        }
    }

    /// Popular keys and a struggling backend both argue for caching longer.
    fn adaptive_ttl(&self) -> Duration {
        let (hit_rate, error_rate) = {
            let outcomes = self.outcomes.lock();
            (rate(&outcomes.lookups), rate(&outcomes.fetches))
        };
        let base = self.config.adaptive_base_ttl_secs as f64;
        let secs = base * (0.5 + hit_rate) * (1.0 + error_rate);
        let min = self.config.adaptive_min_ttl_secs as f64;
        let max = self.config.adaptive_max_ttl_secs.max(self.config.adaptive_min_ttl_secs) as f64;
        Duration::from_secs_f64(secs.clamp(min, max))
    }

    fn stretch(&self, ttl: Duration, pressure: PressureLevel) -> Duration {
        let m = self.config.pressure_multiplier.max(1.0);
        let factor = match pressure {
            PressureLevel::Normal => 1.0,
            PressureLevel::Elevated => m,
            PressureLevel::Critical => m * m,
        };
        ttl.mul_f64(factor)
    }

    fn emit(&self, kind: EventKind, key: &str, decision: &CacheStrategyDecision) {
        self.events.emit(DomainEvent::new(
            kind,
            COMPONENT,
            "get_or_fetch",
            json!({ "key": key, "strategy": decision.strategy }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::port::NullEventBus;
    use crate::testkit;
    use crate::testkit::clock::ManualClock;
    use crate::testkit::events::RecordingEventBus;
    use crate::testkit::pressure::FixedPressure;
    use crate::testkit::session::FixedSession;

    fn orchestrator(session: Arc<FixedSession>) -> (SmartCacheOrchestrator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::epoch());
        let orchestrator = SmartCacheOrchestrator::new(
            testkit::config::strategy(),
            session,
            clock.clone(),
            Arc::new(NullEventBus),
        );
        (orchestrator, clock)
    }

    #[test]
    fn strategy_follows_classification_and_session() {
        use CacheStrategy::*;
        use DataClassification::*;
        use MarketSession::*;

        let select = SmartCacheOrchestrator::select_strategy;
        assert_eq!(select(RealtimeQuote, Open), StrongTimeliness);
        assert_eq!(select(RealtimeQuote, Closed), MarketAware);
        assert_eq!(select(Intraday, Open), MarketAware);
        assert_eq!(select(Reference, Closed), WeakTimeliness);
        assert_eq!(select(Fundamental, Open), Adaptive);
        assert_eq!(select(Sensitive, Open), NoCache);
    }

    #[test]
    fn market_aware_ttl_is_shorter_while_open() {
        let session = Arc::new(FixedSession::open());
        let (orchestrator, _) = orchestrator(session.clone());
        let open = orchestrator.decide(DataClassification::Intraday).ttl;

        session.set(MarketSession::Closed);
        let closed = orchestrator.decide(DataClassification::Intraday).ttl;

        assert!(open < closed);
        assert_eq!(open, Duration::from_secs(30));
    }

    #[test]
    fn pressure_extends_ttl() {
        let (orchestrator, _) = orchestrator(Arc::new(FixedSession::open()));
        let normal = orchestrator.decide(DataClassification::Reference).ttl;

        orchestrator.set_pressure(ResourcePressure {
            memory: PressureLevel::Normal,
            cpu: PressureLevel::Elevated,
        });
        let elevated = orchestrator.decide(DataClassification::Reference).ttl;

        orchestrator.set_pressure(ResourcePressure {
            memory: PressureLevel::Critical,
            cpu: PressureLevel::Normal,
        });
        let critical = orchestrator.decide(DataClassification::Reference);

        assert_eq!(elevated, normal.mul_f64(1.5));
        assert_eq!(critical.ttl, normal.mul_f64(2.25));
        assert_eq!(critical.pressure, PressureLevel::Critical);
    }

    #[tokio::test]
    async fn pressure_feed_applies_reported_pressure() {
        let (orchestrator, _) = orchestrator(Arc::new(FixedSession::open()));
        let orchestrator = Arc::new(orchestrator);
        let normal = orchestrator.decide(DataClassification::Reference).ttl;

        let source = Arc::new(FixedPressure::normal());
        source.set(ResourcePressure {
            memory: PressureLevel::Normal,
            cpu: PressureLevel::Elevated,
        });
        let (tx, rx) = watch::channel(false);
        let feed = orchestrator.spawn_pressure_feed(source, Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let decision = orchestrator.decide(DataClassification::Reference);
        assert_eq!(decision.pressure, PressureLevel::Elevated);
        assert_eq!(decision.ttl, normal.mul_f64(1.5));

        tx.send(true).unwrap();
        feed.await.unwrap();
    }

    #[test]
    fn high_error_rate_degrades_to_fallback() {
        let (orchestrator, _) = orchestrator(Arc::new(FixedSession::open()));
        for _ in 0..3 {
            orchestrator.record_fetch(false);
        }
        // Below min_samples the rate is not trusted yet.
        assert!(!orchestrator.decide(DataClassification::RealtimeQuote).degraded);

        orchestrator.record_fetch(true);
        let decision = orchestrator.decide(DataClassification::RealtimeQuote);
        assert!(decision.degraded);
        assert_eq!(decision.strategy, CacheStrategy::WeakTimeliness);

        let sensitive = orchestrator.decide(DataClassification::Sensitive);
        assert_eq!(sensitive.strategy, CacheStrategy::NoCache);
        assert!(!sensitive.degraded);
    }

    #[test]
    fn adaptive_ttl_stays_within_bounds() {
        let (orchestrator, _) = orchestrator(Arc::new(FixedSession::open()));
        let config = testkit::config::strategy();
        let min = Duration::from_secs(config.adaptive_min_ttl_secs);
        let max = Duration::from_secs(config.adaptive_max_ttl_secs);

        let cold = orchestrator.decide(DataClassification::Fundamental).ttl;
        for _ in 0..50 {
            orchestrator.record_lookup(true);
        }
        let warm = orchestrator.decide(DataClassification::Fundamental).ttl;

        assert!(warm > cold);
        assert!(cold >= min && warm <= max);
    }

    #[tokio::test]
    async fn get_or_fetch_caches_until_ttl() {
        let (orchestrator, clock) = orchestrator(Arc::new(FixedSession::open()));
        let counter = std::sync::atomic::AtomicU32::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(json!({ "price": 10 }))
        };

        let first = orchestrator
            .get_or_fetch("quote:AAPL", DataClassification::RealtimeQuote, fetch)
            .await
            .unwrap();
        let second = orchestrator
            .get_or_fetch("quote:AAPL", DataClassification::RealtimeQuote, fetch)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(5));
        orchestrator
            .get_or_fetch("quote:AAPL", DataClassification::RealtimeQuote, fetch)
            .await
            .unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(orchestrator.stats().hit_rate > 0.0);
    }

    #[tokio::test]
    async fn no_cache_always_reads_through() {
        let events = Arc::new(RecordingEventBus::new());
        let orchestrator = SmartCacheOrchestrator::new(
            testkit::config::strategy(),
            Arc::new(FixedSession::open()),
            Arc::new(ManualClock::epoch()),
            events.clone(),
        );
        for _ in 0..2 {
            orchestrator
                .get_or_fetch("acct:42", DataClassification::Sensitive, || async {
                    Ok(json!(1))
                })
                .await
                .unwrap();
        }
        assert_eq!(orchestrator.stats().fetches, 2);
        assert_eq!(orchestrator.stats().cached_values, 0);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn fetch_errors_are_not_cached() {
        let (orchestrator, _) = orchestrator(Arc::new(FixedSession::open()));
        let failed = orchestrator
            .get_or_fetch("quote:MSFT", DataClassification::RealtimeQuote, || async {
                Err(Error::provider_unavailable("alpha", "down"))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(orchestrator.stats().cached_values, 0);
        assert_eq!(orchestrator.stats().error_rate, 1.0);
    }
}
