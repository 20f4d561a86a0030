//! Integration tests for the tiered symbol mapping cache.
//!
//! Exercises the cache against both the scripted rule store and the
//! store-backed repository: TTL expiry, fetch coalescing, bounded waits and
//! renamed rules.

use std::sync::Arc;
use std::time::Duration;

use quotegate::adapter::outbound::{MemoryStore, StoreRuleRepository};
use quotegate::domain::{ProviderId, RuleType, Symbol, SymbolMapping};
use quotegate::error::Error;
use quotegate::infrastructure::cache::{Lookup, SymbolMapperCache, Tier};
use quotegate::port::{EventKind, NullEventBus, RuleRepository};
use quotegate::testkit;
use quotegate::testkit::clock::ManualClock;
use quotegate::testkit::events::RecordingEventBus;
use quotegate::testkit::store::ScriptedRuleRepository;

fn alpha() -> ProviderId {
    ProviderId::new("alpha")
}

fn mapping(canonical: &str, code: &str) -> SymbolMapping {
    SymbolMapping::new(alpha(), Symbol::new(canonical), code, RuleType::Suffix)
}

fn scripted(
    rules: impl IntoIterator<Item = SymbolMapping>,
) -> (SymbolMapperCache, Arc<ScriptedRuleRepository>, Arc<ManualClock>) {
    let repo = Arc::new(ScriptedRuleRepository::with(rules));
    let clock = Arc::new(ManualClock::epoch());
    let cache = SymbolMapperCache::new(
        testkit::config::cache(),
        repo.clone(),
        clock.clone(),
        Arc::new(NullEventBus),
    );
    (cache, repo, clock)
}

// ---------------------------------------------------------------------------
// TTL
// ---------------------------------------------------------------------------

#[tokio::test]
async fn saved_value_is_served_until_ttl_then_missed() {
    let (cache, repo, clock) = scripted([]);
    let aapl = Symbol::new("AAPL");

    cache.save(&mapping("AAPL", "AAPL.US")).await.unwrap();
    let reads_after_save = repo.find_one_calls();

    let lookup = cache.get(&alpha(), &aapl).await;
    assert!(matches!(lookup, Lookup::Hit { tier: Tier::L1, .. }));
    assert_eq!(lookup.mapping().unwrap().provider_code, "AAPL.US");

    clock.advance(Duration::from_secs(59));
    assert!(matches!(
        cache.get(&alpha(), &aapl).await,
        Lookup::Hit { tier: Tier::L2, .. }
    ));
    assert_eq!(repo.find_one_calls(), reads_after_save);

    // Both tiers have lapsed: the cache misses and goes back to the store.
    clock.advance(Duration::from_secs(2));
    assert!(matches!(
        cache.get(&alpha(), &aapl).await,
        Lookup::Hit { tier: Tier::L3, .. }
    ));
    assert_eq!(repo.find_one_calls(), reads_after_save + 1);
}

#[tokio::test]
async fn expired_entries_are_swept() {
    let (cache, _, clock) = scripted([mapping("AAPL", "AAPL.US"), mapping("MSFT", "MSFT.US")]);
    cache
        .batch_get(&alpha(), &[Symbol::new("AAPL"), Symbol::new("MSFT")])
        .await;
    assert!(cache.stats().l2_entries > 0);

    clock.advance(Duration::from_secs(120));
    assert!(cache.sweep_expired() > 0);

    let stats = cache.stats();
    assert_eq!((stats.l1_entries, stats.l2_entries), (0, 0));
}

// ---------------------------------------------------------------------------
// Coalescing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_misses_issue_one_fetch() {
    let (cache, repo, _) = scripted([mapping("TENCENT", "0700.HK")]);
    repo.set_delay(Duration::from_millis(30));

    let lookups: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(&alpha(), &Symbol::new("TENCENT")).await })
        })
        .collect();

    let mut codes = Vec::new();
    for handle in lookups {
        let lookup = handle.await.unwrap();
        codes.push(lookup.into_mapping().unwrap().provider_code);
    }

    assert_eq!(repo.find_one_calls(), 1);
    assert!(codes.iter().all(|c| c == "0700.HK"));
    assert_eq!(cache.stats().l3_fetches, 1);
}

#[tokio::test]
async fn timed_out_caller_still_backfills() {
    let (cache, repo, _) = scripted([mapping("TENCENT", "0700.HK")]);
    repo.set_delay(Duration::from_millis(60));

    let err = cache
        .get_with_timeout(&alpha(), &Symbol::new("TENCENT"), Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    tokio::time::sleep(Duration::from_millis(120)).await;
    let lookup = cache.get(&alpha(), &Symbol::new("TENCENT")).await;
    assert!(matches!(lookup, Lookup::Hit { tier: Tier::L1, .. }));
    assert_eq!(repo.find_one_calls(), 1);
}

// ---------------------------------------------------------------------------
// Backend failures and events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_store_is_unknown_not_fatal() {
    let (cache, repo, _) = scripted([mapping("AAPL", "AAPL.US")]);
    repo.set_down(true);

    assert_eq!(cache.get(&alpha(), &Symbol::new("AAPL")).await, Lookup::Unknown);

    repo.set_down(false);
    assert!(cache.get(&alpha(), &Symbol::new("AAPL")).await.mapping().is_some());
}

#[tokio::test]
async fn hits_and_misses_are_published() {
    let events = Arc::new(RecordingEventBus::new());
    let cache = SymbolMapperCache::new(
        testkit::config::cache(),
        Arc::new(ScriptedRuleRepository::with([mapping("AAPL", "AAPL.US")])),
        Arc::new(ManualClock::epoch()),
        events.clone(),
    );

    cache.get(&alpha(), &Symbol::new("AAPL")).await;
    cache.get(&alpha(), &Symbol::new("AAPL")).await;

    assert_eq!(events.count(EventKind::CacheMiss), 1);
    assert!(events.count(EventKind::CacheHit) >= 1);
    let miss = &events.of_kind(EventKind::CacheMiss)[0];
    assert_eq!(miss.component, "symbol_mapper");
}

// ---------------------------------------------------------------------------
// Store-backed repository
// ---------------------------------------------------------------------------

#[tokio::test]
async fn renamed_rule_resolves_through_store_backed_repository() {
    let clock = Arc::new(ManualClock::epoch());
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let repo = Arc::new(StoreRuleRepository::new(store));
    repo.save(&mapping("TENCENT", "700.HK")).await.unwrap();

    let cache = SymbolMapperCache::new(
        testkit::config::cache(),
        repo.clone(),
        clock,
        Arc::new(NullEventBus),
    );
    assert!(cache.get_canonical(&alpha(), "700.HK").await.mapping().is_some());

    cache.save(&mapping("TENCENT", "0700.HK")).await.unwrap();

    assert_eq!(cache.get_canonical(&alpha(), "700.HK").await, Lookup::Miss);
    let renamed = cache.get_canonical(&alpha(), "0700.HK").await;
    assert_eq!(renamed.mapping().unwrap().canonical, Symbol::new("TENCENT"));
    assert!(repo
        .find_by_provider_code(&alpha(), "700.HK")
        .await
        .unwrap()
        .is_none());
}
