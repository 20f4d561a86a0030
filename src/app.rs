//! Composition root.
//!
//! Wires configuration, adapters and infrastructure into a running gateway
//! and owns the background tasks' lifecycle: every task watches the same
//! shutdown signal and is awaited with a bounded grace period before being
//! aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapter::inbound::WebSocketServer;
use crate::adapter::outbound::{
    simulated_factory, ChannelEventBus, MemoryStore, StoreRuleRepository, WeekdaySchedule,
};
use crate::application::cache::{BudgetPressure, SmartCacheOrchestrator};
use crate::application::{Gateway, QuoteService};
use crate::domain::{Clock, CredentialId, ProviderId, SystemClock};
use crate::error::{Error, Result};
use crate::infrastructure::broadcast::GatewayBroadcaster;
use crate::infrastructure::cache::SymbolMapperCache;
use crate::infrastructure::config::Config;
use crate::infrastructure::provider::{
    ConnectionPoolManager, ProviderFeed, ProviderUpdate, StreamRecoveryWorker,
};
use crate::infrastructure::rate_limit::RateLimiter;
use crate::infrastructure::subscription::StreamClientStateManager;
use crate::port::{PressureSource, ProviderFactory};

const EVENT_CAPACITY: usize = 1024;

pub struct App {
    config: Config,
    provider: ProviderId,
    events: Arc<ChannelEventBus>,
    pool: Arc<ConnectionPoolManager>,
    mapper: SymbolMapperCache,
    store: Arc<MemoryStore>,
    orchestrator: Arc<SmartCacheOrchestrator>,
    pressure: Arc<dyn PressureSource>,
    recovery: Arc<StreamRecoveryWorker>,
    gateway: Arc<Gateway>,
    updates: mpsc::Receiver<ProviderUpdate>,
}

impl App {
    /// Build the gateway against the simulated provider.
    ///
    /// # Errors
    ///
    /// Configuration errors from adapter construction.
    pub fn build(config: Config) -> Result<Self> {
        let factory = simulated_factory(Duration::from_millis(config.upstream.simulated_tick_ms));
        Self::build_with(config, factory)
    }

    /// Build the gateway against an arbitrary provider factory.
    ///
    /// # Errors
    ///
    /// Configuration errors from adapter construction.
    pub fn build_with(config: Config, factory: ProviderFactory) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events = Arc::new(ChannelEventBus::new(EVENT_CAPACITY));
        let provider = ProviderId::new(config.upstream.provider.clone());
        let credential = CredentialId::new(config.upstream.credential.clone());

        let store = Arc::new(MemoryStore::new(clock.clone()));
        let rules = Arc::new(StoreRuleRepository::new(store.clone()));
        let sessions = Arc::new(WeekdaySchedule::from_config(&config.upstream, clock.clone())?);

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.clone(),
            store.clone(),
            clock.clone(),
            events.clone(),
        ));
        let pool = Arc::new(
            ConnectionPoolManager::new(config.pool.clone(), factory, clock.clone(), events.clone())
                .with_admission(limiter.clone()),
        );
        let updates = pool.take_updates().ok_or_else(|| {
            Error::provider_unavailable(&provider, "update channel already taken")
        })?;

        let mapper = SymbolMapperCache::new(config.cache.clone(), rules, clock.clone(), events.clone());
        let feed = Arc::new(ProviderFeed::new(
            Arc::clone(&pool),
            mapper.clone(),
            provider.clone(),
            credential.clone(),
        ));
        let subscriptions = Arc::new(StreamClientStateManager::new(feed));
        let broadcaster = Arc::new(GatewayBroadcaster::new(
            config.broadcast.clone(),
            Arc::clone(&subscriptions),
            clock.clone(),
            events.clone(),
        ));
        let recovery = Arc::new(StreamRecoveryWorker::new(
            config.recovery.clone(),
            Arc::clone(&pool),
            Arc::clone(&subscriptions),
            broadcaster.clone(),
            events.clone(),
        ));

        let orchestrator = Arc::new(SmartCacheOrchestrator::new(
            config.strategy.clone(),
            sessions,
            clock.clone(),
            events.clone(),
        ));
        let pressure: Arc<dyn PressureSource> = Arc::new(BudgetPressure::new(
            config.pressure.clone(),
            Arc::clone(&pool),
            mapper.clone(),
            Arc::clone(&orchestrator),
        ));
        let quotes = Arc::new(QuoteService::new(
            Arc::clone(&pool),
            mapper.clone(),
            Arc::clone(&orchestrator),
            provider.clone(),
            credential,
        ));
        let gateway = Arc::new(
            Gateway::new(subscriptions, broadcaster, mapper.clone(), limiter, clock)
                .with_snapshots(quotes),
        );

        Ok(Self {
            config,
            provider,
            events,
            pool,
            mapper,
            store,
            orchestrator,
            pressure,
            recovery,
            gateway,
            updates,
        })
    }

    /// Event bus every component publishes to.
    pub fn events(&self) -> Arc<ChannelEventBus> {
        Arc::clone(&self.events)
    }

    /// Serve until `shutdown` flips, then stop every task.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let server = WebSocketServer::bind(&self.config.server.bind, self.gateway.clone()).await?;
        info!(
            addr = %server.local_addr()?,
            provider = %self.provider,
            "quotegate running"
        );

        let tasks: Vec<(&'static str, JoinHandle<()>)> = vec![
            (
                "health",
                self.pool.spawn_health_task(self.provider.clone(), shutdown.clone()),
            ),
            ("recovery", self.recovery.spawn(shutdown.clone())),
            (
                "sweeper",
                self.mapper
                    .spawn_sweeper(Arc::clone(&self.pressure), shutdown.clone()),
            ),
            (
                "pressure",
                self.orchestrator.spawn_pressure_feed(
                    Arc::clone(&self.pressure),
                    self.config.pressure.sample_interval(),
                    shutdown.clone(),
                ),
            ),
            (
                "janitor",
                self.store
                    .spawn_janitor(self.config.cache.sweep_interval(), shutdown.clone()),
            ),
            (
                "updates",
                self.gateway.spawn_update_pump(self.updates, shutdown.clone()),
            ),
            ("server", tokio::spawn(server.run(shutdown.clone()))),
        ];

        // A dropped sender counts as shutdown too.
        let _ = shutdown.wait_for(|stop| *stop).await;
        info!("Stopping background tasks");

        let grace = self.config.server.shutdown_timeout();
        for (name, mut handle) in tasks {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!(task = name, grace_ms = grace.as_millis() as u64, "Task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.pool.close_all().await;
        info!("quotegate stopped");
        Ok(())
    }
}
