//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use quotegate::adapter::outbound::MemoryStore;
use quotegate::application::Gateway;
use quotegate::domain::{CredentialId, ProviderId, RuleType, Symbol, SymbolMapping, SystemClock};
use quotegate::infrastructure::broadcast::GatewayBroadcaster;
use quotegate::infrastructure::cache::SymbolMapperCache;
use quotegate::infrastructure::config::RateLimitConfig;
use quotegate::infrastructure::provider::{
    ConnectionPoolManager, ProviderFeed, ProviderUpdate, StreamRecoveryWorker,
};
use quotegate::infrastructure::rate_limit::RateLimiter;
use quotegate::infrastructure::subscription::StreamClientStateManager;
use quotegate::testkit;
use quotegate::testkit::events::RecordingEventBus;
use quotegate::testkit::provider::ProviderScript;
use quotegate::testkit::store::ScriptedRuleRepository;

pub const PROVIDER: &str = "alpha";
pub const CREDENTIAL: &str = "key-1";

pub fn provider() -> ProviderId {
    ProviderId::new(PROVIDER)
}

pub fn credential() -> CredentialId {
    CredentialId::new(CREDENTIAL)
}

pub fn symbols(names: &[&str]) -> Vec<Symbol> {
    names.iter().map(|s| Symbol::new(*s)).collect()
}

/// The full streaming path wired around a scripted provider.
pub struct Harness {
    pub script: Arc<ProviderScript>,
    pub rules: Arc<ScriptedRuleRepository>,
    pub pool: Arc<ConnectionPoolManager>,
    pub mapper: SymbolMapperCache,
    pub subscriptions: Arc<StreamClientStateManager>,
    pub broadcaster: Arc<GatewayBroadcaster>,
    pub recovery: Arc<StreamRecoveryWorker>,
    pub gateway: Arc<Gateway>,
    pub events: Arc<RecordingEventBus>,
    pub shutdown: watch::Sender<bool>,
    updates: Option<mpsc::Receiver<ProviderUpdate>>,
}

impl Harness {
    pub fn new(max_retries: u32) -> Self {
        let clock = Arc::new(SystemClock);
        let events = Arc::new(RecordingEventBus::new());
        let script = ProviderScript::new();
        let rules = Arc::new(ScriptedRuleRepository::with([SymbolMapping::new(
            provider(),
            Symbol::new("TENCENT"),
            "0700.HK",
            RuleType::Suffix,
        )]));

        let pool = Arc::new(ConnectionPoolManager::new(
            testkit::config::pool(8, 4),
            script.factory(),
            clock.clone(),
            events.clone(),
        ));
        let updates = pool.take_updates();
        let mapper = SymbolMapperCache::new(
            testkit::config::cache(),
            rules.clone(),
            clock.clone(),
            events.clone(),
        );
        let feed = ProviderFeed::new(Arc::clone(&pool), mapper.clone(), provider(), credential());
        let subscriptions = Arc::new(StreamClientStateManager::new(Arc::new(feed)));
        let broadcaster = Arc::new(GatewayBroadcaster::new(
            testkit::config::broadcast(4),
            Arc::clone(&subscriptions),
            clock.clone(),
            events.clone(),
        ));
        let recovery = Arc::new(StreamRecoveryWorker::new(
            testkit::config::recovery(max_retries),
            Arc::clone(&pool),
            Arc::clone(&subscriptions),
            broadcaster.clone(),
            events.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(MemoryStore::new(clock.clone())),
            clock.clone(),
            events.clone(),
        ));
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&subscriptions),
            Arc::clone(&broadcaster),
            mapper.clone(),
            limiter,
            clock,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            script,
            rules,
            pool,
            mapper,
            subscriptions,
            broadcaster,
            recovery,
            gateway,
            events,
            shutdown,
            updates,
        }
    }

    /// Start forwarding provider updates to clients. Can be called once.
    pub fn start_pump(&mut self) -> JoinHandle<()> {
        let updates = self.updates.take().expect("update pump already started");
        self.gateway
            .spawn_update_pump(updates, self.shutdown.subscribe())
    }

    /// Fail one health check so the stream connection is marked degraded.
    pub async fn degrade_stream(&self) {
        self.script.set_ping_down(true);
        self.pool.check_health(&provider()).await;
        self.script.set_ping_down(false);
    }
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
