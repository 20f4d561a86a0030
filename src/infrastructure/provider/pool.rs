//! Pool of live provider connections.
//!
//! The pool owns every provider session. Request-path callers check a
//! connection out with [`ConnectionPoolManager::acquire`] and hand it back
//! with [`release`](ConnectionPoolManager::release); the push path keeps one
//! long-lived stream connection per (provider, credential) onto which all
//! client subscriptions are multiplexed.
//!
//! # Ceilings
//!
//! New connections are bounded by three ceilings: global, per credential
//! and per origin. The read-check-reserve sequence runs under one lock, and
//! the slot is reserved in `CONNECTING` before the provider handshake
//! starts, so concurrent acquires can never overshoot. When a ceiling is
//! hit, the longest-idle connection counted against it is reclaimed before
//! the acquire is refused.
//!
//! # Health
//!
//! A background task per provider (see [`spawn_health_task`]) pings every
//! connected session. After `failure_threshold` consecutive failures a
//! connection moves to `DEGRADED`: it is no longer handed out but stays in
//! the pool for the recovery worker. The same task closes connections idle
//! past `idle_timeout`.
//!
//! Every provider call is bounded: connects by `connect_timeout`, quote and
//! subscription calls by `call_timeout`. An elapsed call fails with
//! [`Error::Timeout`] and counts like any other provider failure.
//!
//! [`spawn_health_task`]: ConnectionPoolManager::spawn_health_task

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{Clock, ConnectionId, ConnectionState, CredentialId, ProviderId};
use crate::error::{Error, Result};
use crate::infrastructure::config::PoolConfig;
use crate::port::{
    AdmissionControl, DomainEvent, EventBus, EventKind, ProviderClient, ProviderFactory, Quote,
    UpdateCallback,
};

mod health;
mod state;

pub use health::HealthReport;
use state::{Ceiling, PoolState, PooledConnection, SharedCounters};

const COMPONENT: &str = "connection_pool";

/// A connection checked out of the pool.
///
/// Hand it back with [`ConnectionPoolManager::release`].
pub struct ConnectionHandle {
    id: ConnectionId,
    provider: ProviderId,
    credential: CredentialId,
    client: Arc<dyn ProviderClient>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub const fn provider(&self) -> &ProviderId {
        &self.provider
    }

    #[must_use]
    pub const fn credential(&self) -> &CredentialId {
        &self.credential
    }

    #[must_use]
    pub fn client(&self) -> &Arc<dyn ProviderClient> {
        &self.client
    }
}

/// A quote pushed by a provider on a stream connection.
#[derive(Debug, Clone)]
pub struct ProviderUpdate {
    pub provider: ProviderId,
    pub credential: CredentialId,
    pub quote: Quote,
}

/// A connection awaiting recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradedConnection {
    pub id: ConnectionId,
    pub provider: ProviderId,
    pub credential: CredentialId,
    pub stream: bool,
}

/// Runtime statistics for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
    pub degraded: usize,
    pub reconnecting: usize,
    pub acquisitions: u64,
    pub rejections: u64,
    pub health_failures: u64,
    pub reaped: u64,
    pub reconnects: u64,
    pub updates_dropped: u64,
}

pub struct ConnectionPoolManager {
    config: PoolConfig,
    factory: ProviderFactory,
    admission: Option<Arc<dyn AdmissionControl>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventBus>,
    state: parking_lot::Mutex<PoolState>,
    /// Serializes creation of stream connections.
    stream_open: tokio::sync::Mutex<()>,
    counters: Arc<SharedCounters>,
    next_id: AtomicU64,
    update_tx: mpsc::Sender<ProviderUpdate>,
    update_rx: parking_lot::Mutex<Option<mpsc::Receiver<ProviderUpdate>>>,
}

impl ConnectionPoolManager {
    pub fn new(
        config: PoolConfig,
        factory: ProviderFactory,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        let (update_tx, update_rx) = mpsc::channel(config.update_channel_capacity.max(1));
        Self {
            config,
            factory,
            admission: None,
            clock,
            events,
            state: parking_lot::Mutex::new(PoolState::default()),
            stream_open: tokio::sync::Mutex::new(()),
            counters: Arc::new(SharedCounters::default()),
            next_id: AtomicU64::new(0),
            update_tx,
            update_rx: parking_lot::Mutex::new(Some(update_rx)),
        }
    }

    /// Gate new acquisitions on an external admission check.
    #[must_use]
    pub fn with_admission(mut self, admission: Arc<dyn AdmissionControl>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Receiver for quotes pushed on stream connections. Can be taken once.
    pub fn take_updates(&self) -> Option<mpsc::Receiver<ProviderUpdate>> {
        self.update_rx.lock().take()
    }

    /// Fraction of the update channel currently queued, in `0.0..=1.0`.
    #[must_use]
    pub fn update_backlog(&self) -> f64 {
        let max = self.update_tx.max_capacity();
        max.saturating_sub(self.update_tx.capacity()) as f64 / max as f64
    }

    // ---- Request path ----

    /// Check out a connection for `(provider, credential)`.
    ///
    /// Reuses an idle connection when one exists, otherwise opens a new one
    /// within the configured ceilings.
    ///
    /// # Errors
    ///
    /// - [`Error::ProviderUnavailable`] when the provider is marked
    ///   unavailable, admission is denied, or the handshake fails
    /// - [`Error::ConnectionExhausted`] when a ceiling is reached and no
    ///   idle connection can be reclaimed
    pub async fn acquire(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
        origin: Option<&str>,
    ) -> Result<ConnectionHandle> {
        self.ensure_available(provider)?;

        if let Some(admission) = &self.admission {
            if !admission.admit(credential).await {
                self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(provider = %provider, credential = %credential, "Acquire denied by admission control");
                return Err(Error::provider_unavailable(
                    provider,
                    format!("admission denied for credential {credential}"),
                ));
            }
        }

        let handle = match self.checkout_idle(provider, credential) {
            Some(handle) => handle,
            None => self.open(provider, credential, origin, false).await?,
        };
        self.counters.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Return a connection to the idle pool.
    pub fn release(&self, handle: ConnectionHandle) {
        let mut state = self.state.lock();
        if let Some(conn) = state.connections.get_mut(&handle.id) {
            conn.in_use = false;
            conn.idle_since = Some(Instant::now());
        }
    }

    /// Close and forget a connection. Returns whether it existed.
    pub async fn close(&self, id: ConnectionId) -> bool {
        let removed = self.state.lock().connections.remove(&id);
        match removed {
            Some(conn) => {
                close_client(&conn, self.config.call_timeout()).await;
                true
            }
            None => false,
        }
    }

    /// Close every connection. Used on shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<PooledConnection> = {
            let mut state = self.state.lock();
            state.connections.drain().map(|(_, c)| c).collect()
        };
        let limit = self.config.call_timeout();
        let closing = drained.iter().map(|conn| close_client(conn, limit));
        futures_util::future::join_all(closing).await;
        info!(closed = drained.len(), "Connection pool closed");
    }

    /// One-shot quote: acquire, call the provider, release.
    ///
    /// # Errors
    ///
    /// Propagates acquisition and provider errors. A provider error counts
    /// as a health failure for the connection used.
    pub async fn quote(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
        codes: &[String],
    ) -> Result<Vec<Quote>> {
        let handle = self.acquire(provider, credential, None).await?;
        let result = bounded("quote", self.config.call_timeout(), handle.client.quote(codes)).await;
        self.record_health(handle.id, result.is_ok());
        self.release(handle);
        result
    }

    // ---- Stream path ----

    /// Subscribe provider codes on the shared stream connection.
    ///
    /// Codes already subscribed on the current session are skipped, so
    /// replaying a set is idempotent. Returns how many codes were sent.
    ///
    /// # Errors
    ///
    /// Fails when the stream connection cannot be opened or is not
    /// currently `CONNECTED`, or when the provider rejects the call.
    pub async fn stream_subscribe(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
        codes: &[String],
    ) -> Result<usize> {
        let id = self.ensure_stream(provider, credential).await?;

        let (client, fresh) = {
            let mut state = self.state.lock();
            let conn = state
                .connections
                .get_mut(&id)
                .ok_or_else(|| Error::provider_unavailable(provider, "stream connection closed"))?;
            if !conn.state.is_acquirable() {
                return Err(Error::provider_unavailable(
                    provider,
                    format!("stream connection is {}", conn.state),
                ));
            }
            let fresh: Vec<String> = codes
                .iter()
                .filter(|code| conn.subscribed.insert((*code).clone()))
                .cloned()
                .collect();
            (Arc::clone(&conn.client), fresh)
        };

        if fresh.is_empty() {
            return Ok(0);
        }

        let callback = self.update_callback(provider, credential);
        let subscribed = bounded(
            "subscribe",
            self.config.call_timeout(),
            client.subscribe(&fresh, callback),
        )
        .await;
        if let Err(e) = subscribed {
            let mut state = self.state.lock();
            if let Some(conn) = state.connections.get_mut(&id) {
                for code in &fresh {
                    conn.subscribed.remove(code);
                }
            }
            return Err(e);
        }

        debug!(provider = %provider, connection = %id, codes = fresh.len(), "Stream subscribed");
        Ok(fresh.len())
    }

    /// Unsubscribe provider codes from the stream connection.
    ///
    /// # Errors
    ///
    /// Propagates the provider error; the codes are forgotten either way.
    pub async fn stream_unsubscribe(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
        codes: &[String],
    ) -> Result<usize> {
        let (client, gone) = {
            let mut state = self.state.lock();
            let Some(id) = state.stream_for(provider, credential).map(|c| c.id) else {
                return Ok(0);
            };
            let Some(conn) = state.connections.get_mut(&id) else {
                return Ok(0);
            };
            let gone: Vec<String> = codes
                .iter()
                .filter(|code| conn.subscribed.remove(code.as_str()))
                .cloned()
                .collect();
            (Arc::clone(&conn.client), gone)
        };

        if gone.is_empty() {
            return Ok(0);
        }
        bounded("unsubscribe", self.config.call_timeout(), client.unsubscribe(&gone)).await?;
        debug!(provider = %provider, codes = gone.len(), "Stream unsubscribed");
        Ok(gone.len())
    }

    /// Whether the stream connection for this key exists and is `CONNECTED`.
    pub fn has_live_stream(&self, provider: &ProviderId, credential: &CredentialId) -> bool {
        self.state
            .lock()
            .stream_for(provider, credential)
            .is_some_and(|c| c.state == ConnectionState::Connected)
    }

    // ---- Recovery hooks ----

    pub fn degraded_connections(&self) -> Vec<DegradedConnection> {
        let state = self.state.lock();
        let mut degraded: Vec<DegradedConnection> = state
            .connections
            .values()
            .filter(|c| c.state == ConnectionState::Degraded)
            .map(|c| DegradedConnection {
                id: c.id,
                provider: c.provider.clone(),
                credential: c.credential.clone(),
                stream: c.stream,
            })
            .collect();
        degraded.sort_by_key(|c| c.id);
        degraded
    }

    /// Claim a degraded connection for recovery (`DEGRADED → RECONNECTING`).
    ///
    /// Returns `false` if it is gone or already claimed.
    pub fn begin_reconnect(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock();
        match state.connections.get_mut(&id) {
            Some(conn) if conn.state == ConnectionState::Degraded => {
                conn.transition(ConnectionState::Reconnecting)
            }
            _ => false,
        }
    }

    /// Replace the session behind a `RECONNECTING` connection.
    ///
    /// On success the connection is `CONNECTED` again with an empty
    /// subscription set; the caller replays subscriptions.
    ///
    /// # Errors
    ///
    /// Returns the provider's connect error, or [`Error::ProviderUnavailable`]
    /// if the connection was removed meanwhile.
    pub async fn reconnect(&self, id: ConnectionId) -> Result<()> {
        let (provider, credential) = {
            let state = self.state.lock();
            let conn = state.connections.get(&id).ok_or_else(|| {
                Error::provider_unavailable("unknown", format!("{id} is no longer pooled"))
            })?;
            (conn.provider.clone(), conn.credential.clone())
        };

        let client = (self.factory)(&provider, &credential);
        if let Err(e) = bounded("connect", self.config.connect_timeout(), client.connect()).await {
            let _ = bounded("close", self.config.call_timeout(), client.close()).await;
            return Err(e);
        }

        let previous = {
            let mut state = self.state.lock();
            match state.connections.get_mut(&id) {
                Some(conn) if conn.state.can_transition_to(ConnectionState::Connected) => {
                    conn.state = ConnectionState::Connected;
                    conn.consecutive_failures = 0;
                    conn.subscribed.clear();
                    Some(std::mem::replace(&mut conn.client, Arc::clone(&client)))
                }
                _ => None,
            }
        };

        let Some(previous) = previous else {
            let _ = bounded("close", self.config.call_timeout(), client.close()).await;
            return Err(Error::provider_unavailable(
                &provider,
                format!("{id} left RECONNECTING during reconnect"),
            ));
        };
        if let Err(e) = bounded("close", self.config.call_timeout(), previous.close()).await {
            debug!(connection = %id, error = %e, "Closing replaced session failed");
        }

        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        info!(provider = %provider, connection = %id, "Connection re-established");
        Ok(())
    }

    /// Put a `RECONNECTING` connection back to `DEGRADED` after a failed
    /// recovery pass was interrupted.
    pub fn abandon_reconnect(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        if let Some(conn) = state.connections.get_mut(&id) {
            conn.transition(ConnectionState::Degraded);
        }
    }

    /// Terminal failure: `→ CLOSED`, then drop the connection.
    pub async fn mark_closed(&self, id: ConnectionId) {
        let removed = {
            let mut state = self.state.lock();
            if let Some(conn) = state.connections.get_mut(&id) {
                conn.transition(ConnectionState::Closed);
            }
            state.connections.remove(&id)
        };
        if let Some(conn) = removed {
            close_client(&conn, self.config.call_timeout()).await;
            info!(provider = %conn.provider, connection = %id, "Connection closed");
        }
    }

    /// Refuse new work for `provider` for the configured cooldown.
    pub fn mark_provider_unavailable(&self, provider: &ProviderId) {
        let until = Instant::now() + self.config.unavailable_cooldown();
        self.state.lock().unavailable.insert(provider.clone(), until);
        warn!(
            provider = %provider,
            cooldown_secs = self.config.unavailable_cooldown_secs,
            "Provider marked unavailable"
        );
    }

    pub fn is_provider_available(&self, provider: &ProviderId) -> bool {
        self.ensure_available(provider).is_ok()
    }

    pub fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.state.lock().connections.get(&id).map(|c| c.state)
    }

    pub fn stream_connection(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
    ) -> Option<ConnectionId> {
        self.state.lock().stream_for(provider, credential).map(|c| c.id)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let conns = || state.connections.values();
        PoolStats {
            total: state.connections.len(),
            in_use: conns().filter(|c| c.in_use).count(),
            idle: conns().filter(|c| c.is_idle()).count(),
            degraded: conns()
                .filter(|c| c.state == ConnectionState::Degraded)
                .count(),
            reconnecting: conns()
                .filter(|c| c.state == ConnectionState::Reconnecting)
                .count(),
            acquisitions: self.counters.acquisitions.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
            health_failures: self.counters.health_failures.load(Ordering::Relaxed),
            reaped: self.counters.reaped.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            updates_dropped: self.counters.updates_dropped.load(Ordering::Relaxed),
        }
    }

    // ---- Internals ----

    fn ensure_available(&self, provider: &ProviderId) -> Result<()> {
        let mut state = self.state.lock();
        let until = state.unavailable.get(provider).copied();
        match until {
            Some(until) if Instant::now() < until => Err(Error::provider_unavailable(
                provider,
                "marked unavailable after recovery gave up",
            )),
            Some(_) => {
                state.unavailable.remove(provider);
                info!(provider = %provider, "Provider cooldown elapsed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn checkout_idle(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
    ) -> Option<ConnectionHandle> {
        let mut state = self.state.lock();
        let id = state.idle_for_key(provider, credential)?;
        let conn = state.connections.get_mut(&id)?;
        conn.in_use = true;
        conn.idle_since = None;
        Some(handle_for(conn))
    }

    async fn ensure_stream(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
    ) -> Result<ConnectionId> {
        self.ensure_available(provider)?;
        let _opening = self.stream_open.lock().await;
        if let Some(id) = self.stream_connection(provider, credential) {
            return Ok(id);
        }
        let handle = self.open(provider, credential, None, true).await?;
        info!(provider = %provider, connection = %handle.id, "Stream connection opened");
        Ok(handle.id)
    }

    /// Reserve a slot within the ceilings, then connect outside the lock.
    async fn open(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
        origin: Option<&str>,
        stream: bool,
    ) -> Result<ConnectionHandle> {
        let limits = (
            self.config.max_global,
            self.config.max_per_key,
            self.config.max_per_origin,
        );

        let (handle, reclaimed) = {
            let mut state = self.state.lock();
            let mut reclaimed = None;
            if let Some(ceiling) = state.exceeded_ceiling(provider, credential, origin, limits) {
                match state.reclaimable(ceiling, provider, credential, origin) {
                    Some(victim) => reclaimed = state.connections.remove(&victim),
                    None => return Err(self.exhausted(provider, credential, ceiling)),
                }
                // One reclaimed slot frees every ceiling the victim counted against,
                // but the new connection may still break a different one.
                if let Some(ceiling) = state.exceeded_ceiling(provider, credential, origin, limits) {
                    if let Some(victim) = reclaimed.take() {
                        state.connections.insert(victim.id, victim);
                    }
                    return Err(self.exhausted(provider, credential, ceiling));
                }
            }

            let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
            let conn = PooledConnection {
                id,
                provider: provider.clone(),
                credential: credential.clone(),
                origin: origin.map(str::to_string),
                client: (self.factory)(provider, credential),
                state: ConnectionState::Connecting,
                consecutive_failures: 0,
                last_health_check_at: None,
                in_use: true,
                idle_since: None,
                stream,
                subscribed: HashSet::new(),
            };
            let handle = handle_for(&conn);
            state.connections.insert(id, conn);
            (handle, reclaimed)
        };

        if let Some(victim) = reclaimed {
            info!(
                provider = %victim.provider,
                connection = %victim.id,
                "Reclaiming idle connection for new acquisition"
            );
            close_client(&victim, self.config.call_timeout()).await;
        }

        match bounded("connect", self.config.connect_timeout(), handle.client.connect()).await {
            Ok(()) => {
                let mut state = self.state.lock();
                if let Some(conn) = state.connections.get_mut(&handle.id) {
                    conn.transition(ConnectionState::Connected);
                }
                debug!(provider = %provider, connection = %handle.id, stream, "Connection opened");
                Ok(handle)
            }
            Err(e) => {
                self.state.lock().connections.remove(&handle.id);
                let _ = bounded("close", self.config.call_timeout(), handle.client.close()).await;
                warn!(provider = %provider, error = %e, "Provider connect failed");
                self.events.emit(DomainEvent::new(
                    EventKind::OperationFailed,
                    COMPONENT,
                    "connect",
                    json!({ "provider": provider.as_str(), "reason": e.to_string() }),
                ));
                Err(Error::provider_unavailable(provider, e.to_string()))
            }
        }
    }

    fn exhausted(&self, provider: &ProviderId, credential: &CredentialId, ceiling: Ceiling) -> Error {
        self.counters.rejections.fetch_add(1, Ordering::Relaxed);
        warn!(
            provider = %provider,
            credential = %credential,
            scope = ceiling.scope(),
            "Connection ceiling reached"
        );
        Error::ConnectionExhausted {
            provider: provider.to_string(),
            credential: credential.to_string(),
            scope: ceiling.scope(),
        }
    }

    fn update_callback(&self, provider: &ProviderId, credential: &CredentialId) -> UpdateCallback {
        let tx = self.update_tx.clone();
        let counters = Arc::clone(&self.counters);
        let provider = provider.clone();
        let credential = credential.clone();
        Arc::new(move |quote: Quote| {
            let update = ProviderUpdate {
                provider: provider.clone(),
                credential: credential.clone(),
                quote,
            };
            if tx.try_send(update).is_err() {
                counters.updates_dropped.fetch_add(1, Ordering::Relaxed);
            }
        })
    }
}

/// Run a provider call under `limit`.
async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| Error::Timeout {
            operation,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })?
}

fn handle_for(conn: &PooledConnection) -> ConnectionHandle {
    ConnectionHandle {
        id: conn.id,
        provider: conn.provider.clone(),
        credential: conn.credential.clone(),
        client: Arc::clone(&conn.client),
    }
}

async fn close_client(conn: &PooledConnection, limit: Duration) {
    if let Err(e) = bounded("close", limit, conn.client.close()).await {
        debug!(connection = %conn.id, error = %e, "Provider close failed");
    }
}
