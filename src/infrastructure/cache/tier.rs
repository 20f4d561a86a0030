//! Bounded, TTL-aware cache tiers.
//!
//! - [`SnapshotTier`]: reads are lock-free loads of an immutable map
//!   snapshot; writers serialize on a mutex and swap in a modified copy.
//!   Recency is tracked with a per-slot atomic tick so reads never write
//!   the map.
//! - [`LruTier`]: a mutex-guarded map with a tick-ordered index for strict
//!   LRU eviction.
//!
//! Both tiers read time through [`Clock`] and treat an entry whose TTL has
//! elapsed as absent.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::Clock;

/// Cache level an entry was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
    pub tier: Tier,
}

impl<V> CacheEntry<V> {
    fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.stored_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Time left before the entry expires; zero once it has.
    #[must_use]
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).to_std().unwrap_or(Duration::ZERO)
    }
}

fn fraction_of(len: usize, ratio: f64) -> usize {
    ((len as f64) * ratio.clamp(0.0, 1.0)).ceil() as usize
}

// ---- L1: snapshot tier ----

struct Slot<V> {
    entry: CacheEntry<V>,
    last_access: AtomicU64,
}

pub struct SnapshotTier<K, V> {
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    map: ArcSwap<HashMap<K, Arc<Slot<V>>>>,
    writer: Mutex<()>,
    tick: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> SnapshotTier<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            clock,
            map: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(()),
            tick: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        let snapshot = self.map.load();
        let slot = snapshot.get(key)?;
        if slot.entry.is_expired(self.clock.now()) {
            return None;
        }
        slot.last_access
            .store(self.tick.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(slot.entry.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let slot = Arc::new(Slot {
            entry: CacheEntry {
                value,
                stored_at: self.clock.now(),
                ttl,
                tier: Tier::L1,
            },
            last_access: AtomicU64::new(self.tick.fetch_add(1, Ordering::Relaxed)),
        });

        let _guard = self.writer.lock();
        let mut next = HashMap::clone(&self.map.load());
        next.insert(key, slot);
        while next.len() > self.capacity {
            let Some(oldest) = next
                .iter()
                .min_by_key(|(_, s)| s.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            next.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.map.store(Arc::new(next));
    }

    pub fn remove(&self, key: &K) -> bool {
        let _guard = self.writer.lock();
        if !self.map.load().contains_key(key) {
            return false;
        }
        let mut next = HashMap::clone(&self.map.load());
        next.remove(key);
        self.map.store(Arc::new(next));
        true
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let _guard = self.writer.lock();
        let current = self.map.load();
        let next: HashMap<K, Arc<Slot<V>>> = current
            .iter()
            .filter(|(_, s)| !s.entry.is_expired(now))
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();
        let removed = current.len() - next.len();
        if removed > 0 {
            self.map.store(Arc::new(next));
        }
        removed
    }

    /// Evict the least recently used `ratio` of entries.
    pub fn evict_fraction(&self, ratio: f64) -> usize {
        let _guard = self.writer.lock();
        let current = self.map.load();
        let count = fraction_of(current.len(), ratio);
        if count == 0 {
            return 0;
        }
        let mut by_age: Vec<(&K, u64)> = current
            .iter()
            .map(|(k, s)| (k, s.last_access.load(Ordering::Relaxed)))
            .collect();
        by_age.sort_by_key(|(_, tick)| *tick);

        let mut next = HashMap::clone(&current);
        for (key, _) in by_age.into_iter().take(count) {
            next.remove(key);
        }
        self.map.store(Arc::new(next));
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn len(&self) -> usize {
        self.map.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

// ---- L2: LRU tier ----

struct LruInner<K, V> {
    entries: HashMap<K, (CacheEntry<V>, u64)>,
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Eq + Hash + Clone, V> LruInner<K, V> {
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some((_, old)) = self.entries.get_mut(key) {
            self.order.remove(old);
            *old = tick;
            self.order.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let (entry, tick) = self.entries.remove(key)?;
        self.order.remove(&tick);
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

pub struct LruTier<K, V> {
    capacity: usize,
    ttl: Duration,
    tier: Tier,
    clock: Arc<dyn Clock>,
    inner: Mutex<LruInner<K, V>>,
    evictions: AtomicU64,
}

impl<K, V> LruTier<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_tier(capacity, ttl, Tier::L2, clock)
    }

    pub fn with_tier(capacity: usize, ttl: Duration, tier: Tier, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            tier,
            clock,
            inner: Mutex::new(LruInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
            }),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let expired = inner.entries.get(key)?.0.is_expired(now);
        if expired {
            inner.remove(key);
            return None;
        }
        inner.touch(key);
        inner.entries.get(key).map(|(e, _)| e.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
            ttl,
            tier: self.tier,
        };
        let mut inner = self.inner.lock();
        inner.remove(&key);
        while inner.entries.len() >= self.capacity {
            if inner.pop_oldest().is_none() {
                break;
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.order.insert(tick, key.clone());
        inner.entries.insert(key, (entry, tick));
    }

    pub fn remove(&self, key: &K) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, (e, _))| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn evict_fraction(&self, ratio: f64) -> usize {
        let mut inner = self.inner.lock();
        let count = fraction_of(inner.entries.len(), ratio);
        for _ in 0..count {
            inner.pop_oldest();
        }
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::clock::ManualClock;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::epoch())
    }

    #[test]
    fn snapshot_tier_expires_entries() {
        let clock = clock();
        let tier = SnapshotTier::new(8, Duration::from_secs(10), clock.clone());
        tier.insert("a", 1);

        clock.advance(Duration::from_secs(9));
        let entry = tier.get(&"a").unwrap();
        assert_eq!(entry.value, 1);
        assert_eq!(entry.tier, Tier::L1);
        assert_eq!(entry.ttl_remaining(clock.now()), Duration::from_secs(1));

        clock.advance(Duration::from_secs(1));
        assert!(tier.get(&"a").is_none());
        assert_eq!(tier.sweep_expired(), 1);
        assert!(tier.is_empty());
    }

    #[test]
    fn snapshot_tier_evicts_least_recently_read() {
        let tier = SnapshotTier::new(2, Duration::from_secs(60), clock());
        tier.insert("a", 1);
        tier.insert("b", 2);
        assert!(tier.get(&"a").is_some());
        tier.insert("c", 3);

        assert!(tier.get(&"a").is_some());
        assert!(tier.get(&"b").is_none());
        assert!(tier.get(&"c").is_some());
        assert_eq!(tier.evictions(), 1);
    }

    #[test]
    fn lru_tier_is_strict_lru() {
        let tier = LruTier::new(3, Duration::from_secs(60), clock());
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            tier.insert(k, v);
        }
        tier.get(&"a");
        tier.insert("d", 4);

        assert!(tier.get(&"b").is_none());
        assert_eq!(tier.len(), 3);

        tier.insert("a", 10);
        assert_eq!(tier.get(&"a").unwrap().value, 10);
        assert_eq!(tier.len(), 3);
    }

    #[test]
    fn lru_tier_per_entry_ttl() {
        let clock = clock();
        let tier = LruTier::new(4, Duration::from_secs(60), clock.clone());
        tier.insert_with_ttl("short", 1, Duration::from_secs(1));
        tier.insert("long", 2);

        clock.advance(Duration::from_secs(2));
        assert!(tier.get(&"short").is_none());
        assert!(tier.get(&"long").is_some());
    }

    #[test]
    fn pressure_eviction_drops_oldest_fraction() {
        let tier = LruTier::new(10, Duration::from_secs(60), clock());
        for i in 0..8 {
            tier.insert(i, i);
        }
        assert_eq!(tier.evict_fraction(0.25), 2);
        assert!(tier.get(&0).is_none());
        assert!(tier.get(&1).is_none());
        assert!(tier.get(&2).is_some());

        let l1 = SnapshotTier::new(10, Duration::from_secs(60), clock());
        for i in 0..4 {
            l1.insert(i, i);
        }
        assert_eq!(l1.evict_fraction(0.5), 2);
        assert_eq!(l1.len(), 2);
        assert!(l1.get(&3).is_some());
    }
}
