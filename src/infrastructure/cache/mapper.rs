//! Three-tier canonical ⇄ provider symbol mapping cache.
//!
//! Lookups try L1 (small, short TTL, lock-free reads), then L2 (larger,
//! longer TTL), then the durable [`RuleRepository`] (L3). An L3 hit
//! backfills both tiers in both directions.
//!
//! Concurrent misses on the same key share one in-flight L3 fetch. The
//! fetch runs on its own task, so a caller that gives up waiting (see
//! [`SymbolMapperCache::get_with_timeout`]) does not cancel it and the
//! result still lands in the cache.
//!
//! Writes go through [`SymbolMapperCache::save`], which updates the durable
//! store and then refreshes the cached forward entry and drops any stale
//! reverse entry before returning.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::tier::{CacheEntry, LruTier, SnapshotTier, Tier};
use crate::domain::{Clock, PressureLevel, ProviderId, Symbol, SymbolMapping};
use crate::error::{Error, Result};
use crate::infrastructure::config::CacheConfig;
use crate::port::{DomainEvent, EventBus, EventKind, PressureSource, RuleRepository};

const COMPONENT: &str = "symbol_mapper";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    ToProvider,
    ToCanonical,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MappingKey {
    provider: ProviderId,
    code: String,
    direction: Direction,
}

impl MappingKey {
    fn forward(provider: &ProviderId, canonical: &Symbol) -> Self {
        Self {
            provider: provider.clone(),
            code: canonical.as_str().to_string(),
            direction: Direction::ToProvider,
        }
    }

    fn reverse(provider: &ProviderId, provider_code: &str) -> Self {
        Self {
            provider: provider.clone(),
            code: provider_code.to_string(),
            direction: Direction::ToCanonical,
        }
    }
}

/// Result of a mapping lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit { mapping: SymbolMapping, tier: Tier },
    /// The durable store has no active mapping for the key.
    Miss,
    /// The durable store could not be reached; nothing is known.
    Unknown,
}

impl Lookup {
    #[must_use]
    pub fn mapping(&self) -> Option<&SymbolMapping> {
        match self {
            Self::Hit { mapping, .. } => Some(mapping),
            Self::Miss | Self::Unknown => None,
        }
    }

    #[must_use]
    pub fn into_mapping(self) -> Option<SymbolMapping> {
        match self {
            Self::Hit { mapping, .. } => Some(mapping),
            Self::Miss | Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub unknown: u64,
    pub l3_fetches: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub l1_entries: usize,
    pub l2_entries: usize,
}

#[derive(Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    unknown: AtomicU64,
    l3_fetches: AtomicU64,
    coalesced: AtomicU64,
}

/// `None` on store failure, `Some(None)` when absent.
type FetchOutcome = Option<Option<SymbolMapping>>;

struct Inner {
    config: CacheConfig,
    rules: Arc<dyn RuleRepository>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventBus>,
    l1: SnapshotTier<MappingKey, SymbolMapping>,
    l2: LruTier<MappingKey, SymbolMapping>,
    inflight: Mutex<HashMap<MappingKey, watch::Receiver<Option<FetchOutcome>>>>,
    /// Bumped by every write; a fetch that started under an older epoch
    /// must not backfill.
    epoch: AtomicU64,
    counters: Counters,
}

#[derive(Clone)]
pub struct SymbolMapperCache {
    inner: Arc<Inner>,
}

impl SymbolMapperCache {
    pub fn new(
        config: CacheConfig,
        rules: Arc<dyn RuleRepository>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        let l1 = SnapshotTier::new(config.l1_capacity, config.l1_ttl(), clock.clone());
        let l2 = LruTier::new(config.l2_capacity, config.l2_ttl(), clock.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                rules,
                clock,
                events,
                l1,
                l2,
                inflight: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Resolve `canonical` to its provider mapping.
    pub async fn get(&self, provider: &ProviderId, canonical: &Symbol) -> Lookup {
        self.lookup(MappingKey::forward(provider, canonical)).await
    }

    /// Resolve a provider code back to its canonical mapping.
    pub async fn get_canonical(&self, provider: &ProviderId, provider_code: &str) -> Lookup {
        self.lookup(MappingKey::reverse(provider, provider_code))
            .await
    }

    /// [`get`](Self::get) bounded by `timeout`.
    ///
    /// Only the wait is bounded: an in-flight backfill keeps running and
    /// still populates the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when no result arrives in time.
    pub async fn get_with_timeout(
        &self,
        provider: &ProviderId,
        canonical: &Symbol,
        timeout: Duration,
    ) -> Result<Lookup> {
        tokio::time::timeout(timeout, self.get(provider, canonical))
            .await
            .map_err(|_| Error::Timeout {
                operation: "symbol_mapper.get",
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    /// Resolve many symbols with at most one L3 round trip.
    ///
    /// Results are returned in input order.
    pub async fn batch_get(&self, provider: &ProviderId, symbols: &[Symbol]) -> Vec<(Symbol, Lookup)> {
        let mut resolved: HashMap<Symbol, Lookup> = HashMap::with_capacity(symbols.len());
        let mut missing: Vec<Symbol> = Vec::new();
        let mut seen = HashSet::new();

        for symbol in symbols {
            if !seen.insert(symbol.clone()) {
                continue;
            }
            match self.lookup_tiers(&MappingKey::forward(provider, symbol)) {
                Some(lookup) => {
                    resolved.insert(symbol.clone(), lookup);
                }
                None => missing.push(symbol.clone()),
            }
        }

        if !missing.is_empty() {
            let epoch = self.inner.epoch.load(Ordering::SeqCst);
            self.inner.counters.l3_fetches.fetch_add(1, Ordering::Relaxed);
            match self.inner.rules.find(provider, &missing).await {
                Ok(found) => {
                    let found: HashMap<Symbol, SymbolMapping> = found
                        .into_iter()
                        .map(|m| (m.canonical.clone(), m))
                        .collect();
                    for symbol in missing {
                        let lookup = match found.get(&symbol) {
                            Some(mapping) => {
                                self.backfill(mapping, epoch);
                                self.from_store(Some(mapping.clone()))
                            }
                            None => self.from_store(None),
                        };
                        resolved.insert(symbol, lookup);
                    }
                }
                Err(e) => {
                    self.store_failure("batch_get", provider, &e);
                    for symbol in missing {
                        self.inner.counters.unknown.fetch_add(1, Ordering::Relaxed);
                        resolved.insert(symbol, Lookup::Unknown);
                    }
                }
            }
        }

        symbols
            .iter()
            .map(|s| {
                let lookup = resolved.get(s).cloned().unwrap_or(Lookup::Unknown);
                (s.clone(), lookup)
            })
            .collect()
    }

    /// Persist `mapping` and bring L1/L2 in line before returning.
    ///
    /// When the provider code changed, the reverse entry for the previous
    /// code is dropped as well.
    ///
    /// # Errors
    ///
    /// Returns the store error; the cached tiers are left untouched.
    pub async fn save(&self, mapping: &SymbolMapping) -> Result<()> {
        let forward = MappingKey::forward(&mapping.provider, &mapping.canonical);

        let mut stale_codes: HashSet<String> = HashSet::new();
        for cached in [self.inner.l1.get(&forward), self.inner.l2.get(&forward)]
            .into_iter()
            .flatten()
        {
            stale_codes.insert(cached.value.provider_code);
        }
        match self
            .inner
            .rules
            .find_one(&mapping.provider, &mapping.canonical)
            .await
        {
            Ok(Some(previous)) => {
                stale_codes.insert(previous.provider_code);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Could not read previous mapping before save"),
        }

        self.inner.rules.save(mapping).await?;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        for code in stale_codes.iter().filter(|c| **c != mapping.provider_code) {
            let key = MappingKey::reverse(&mapping.provider, code);
            self.inner.l1.remove(&key);
            self.inner.l2.remove(&key);
        }
        self.store_tiers(mapping);

        info!(
            provider = %mapping.provider,
            canonical = %mapping.canonical,
            code = %mapping.provider_code,
            active = mapping.active,
            "Symbol mapping saved"
        );
        Ok(())
    }


    /// Evict beyond LRU order in response to a memory-pressure signal.
    ///
    /// `Normal` only sweeps expired entries; `Elevated` also evicts the
    /// configured fraction of each tier; `Critical` evicts twice that.
    pub fn relieve_pressure(&self, level: PressureLevel) -> usize {
        let mut evicted = self.sweep_expired();
        let ratio = match level {
            PressureLevel::Normal => return evicted,
            PressureLevel::Elevated => self.inner.config.pressure_evict_ratio,
            PressureLevel::Critical => (self.inner.config.pressure_evict_ratio * 2.0).min(1.0),
        };
        evicted += self.inner.l1.evict_fraction(ratio);
        evicted += self.inner.l2.evict_fraction(ratio);
        info!(level = %level, evicted, "Evicted mapping cache under pressure");
        evicted
    }

    pub fn sweep_expired(&self) -> usize {
        self.inner.l1.sweep_expired() + self.inner.l2.sweep_expired()
    }

    /// Periodically sweep expired entries until `shutdown` flips.
    ///
    /// Each tick also reads `pressure` and evicts live entries while memory
    /// pressure is above normal.
    pub fn spawn_sweeper(
        &self,
        pressure: Arc<dyn PressureSource>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        let every = self.inner.config.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let swept = cache.sweep_expired();
                        if swept > 0 {
                            debug!(swept, "Swept expired mapping entries");
                        }
                        cache.relieve_pressure(pressure.pressure().memory);
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Mapping cache sweeper stopped");
        })
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            l1_hits: c.l1_hits.load(Ordering::Relaxed),
            l2_hits: c.l2_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            unknown: c.unknown.load(Ordering::Relaxed),
            l3_fetches: c.l3_fetches.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            evictions: self.inner.l1.evictions() + self.inner.l2.evictions(),
            l1_entries: self.inner.l1.len(),
            l2_entries: self.inner.l2.len(),
        }
    }

    // ---- Internals ----

    async fn lookup(&self, key: MappingKey) -> Lookup {
        if let Some(hit) = self.lookup_tiers(&key) {
            return hit;
        }
        self.emit(EventKind::CacheMiss, "get", &key, None);
        let outcome = self.fetch_coalesced(key).await;
        match outcome {
            Some(found) => self.from_store(found),
            None => {
                self.inner.counters.unknown.fetch_add(1, Ordering::Relaxed);
                Lookup::Unknown
            }
        }
    }

    fn lookup_tiers(&self, key: &MappingKey) -> Option<Lookup> {
        if let Some(entry) = self.inner.l1.get(key) {
            self.inner.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            self.emit(EventKind::CacheHit, "get", key, Some(Tier::L1));
            return Some(hit_or_miss(entry));
        }
        if let Some(entry) = self.inner.l2.get(key) {
            self.inner.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
            self.emit(EventKind::CacheHit, "get", key, Some(Tier::L2));
            let remaining = entry.ttl_remaining(self.inner.clock.now());
            self.inner.l1.insert_with_ttl(
                key.clone(),
                entry.value.clone(),
                remaining.min(self.inner.config.l1_ttl()),
            );
            return Some(hit_or_miss(entry));
        }
        None
    }

    fn from_store(&self, found: Option<SymbolMapping>) -> Lookup {
        match found {
            Some(mapping) if mapping.active => Lookup::Hit {
                mapping,
                tier: Tier::L3,
            },
            _ => {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                Lookup::Miss
            }
        }
    }

    #[allow(clippy::let_and_return)]
    async fn fetch_coalesced(&self, key: MappingKey) -> FetchOutcome {
        let mut rx = {
            let mut inflight = self.inner.inflight.lock();
            if let Some(rx) = inflight.get(&key) {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(key.clone(), rx.clone());
                let cache = self.clone();
                tokio::spawn(async move {
                    let outcome = cache.load(&key).await;
                    cache.inner.inflight.lock().remove(&key);
                    let _ = tx.send(Some(outcome));
                });
                rx
            }
        };

        // Bound to a local so the watch borrow ends before `rx` drops.
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().flatten(),
            Err(_) => None,
        };
        outcome
    }

    async fn load(&self, key: &MappingKey) -> Option<Option<SymbolMapping>> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.inner.counters.l3_fetches.fetch_add(1, Ordering::Relaxed);

        let result = match key.direction {
            Direction::ToProvider => {
                self.inner
                    .rules
                    .find_one(&key.provider, &Symbol::new(key.code.clone()))
                    .await
            }
            Direction::ToCanonical => {
                self.inner
                    .rules
                    .find_by_provider_code(&key.provider, &key.code)
                    .await
            }
        };

        match result {
            Ok(found) => {
                if let Some(mapping) = &found {
                    self.backfill(mapping, epoch);
                }
                Some(found)
            }
            Err(e) => {
                self.store_failure("get", &key.provider, &e);
                None
            }
        }
    }

    fn backfill(&self, mapping: &SymbolMapping, epoch: u64) {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!(canonical = %mapping.canonical, "Skipping backfill superseded by a write");
            return;
        }
        self.store_tiers(mapping);
    }

    fn store_tiers(&self, mapping: &SymbolMapping) {
        let forward = MappingKey::forward(&mapping.provider, &mapping.canonical);
        let reverse = MappingKey::reverse(&mapping.provider, &mapping.provider_code);
        for key in [forward, reverse] {
            self.inner.l1.insert(key.clone(), mapping.clone());
            self.inner.l2.insert(key, mapping.clone());
        }
    }

    fn store_failure(&self, operation: &'static str, provider: &ProviderId, err: &Error) {
        warn!(provider = %provider, error = %err, "Rule store unavailable, treating as unknown");
        self.inner.events.emit(DomainEvent::new(
            EventKind::OperationFailed,
            COMPONENT,
            operation,
            json!({ "provider": provider.as_str(), "reason": err.to_string() }),
        ));
    }

    fn emit(&self, kind: EventKind, operation: &'static str, key: &MappingKey, tier: Option<Tier>) {
        self.inner.events.emit(DomainEvent::new(
            kind,
            COMPONENT,
            operation,
            json!({
                "provider": key.provider.as_str(),
                "key": key.code,
                "reverse": key.direction == Direction::ToCanonical,
                "tier": tier,
            }),
        ));
    }
}

fn hit_or_miss(entry: CacheEntry<SymbolMapping>) -> Lookup {
    if entry.value.active {
        Lookup::Hit {
            mapping: entry.value,
            tier: entry.tier,
        }
    } else {
        Lookup::Miss
    }
}
