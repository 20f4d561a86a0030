//! Per-client stream subscriptions and provider-level reference counts.
//!
//! [`StreamClientStateManager`] is the single owner of "who wants what".
//! Each client holds a set of canonical symbols; each symbol carries a
//! reference count equal to the number of clients holding it. The provider
//! feed is only touched on `0 → 1` (subscribe) and `1 → 0` (unsubscribe)
//! transitions, so any number of clients share one upstream subscription.
//!
//! # Consistency
//!
//! Counts change atomically under a short synchronous lock; provider I/O
//! happens afterwards, under a per-symbol async gate. Whoever holds a
//! symbol's gate subscribes or unsubscribes according to the count it reads
//! there, so the last caller through always leaves the provider matching the
//! count. Readers (the broadcaster's fan-out) only take the read lock and
//! never wait on provider I/O.
//!
//! Feed failures leave the desired state untouched; the recovery worker
//! re-arms the feed from [`StreamClientStateManager::replay`].

mod feed;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::domain::{ClientId, Symbol};
use crate::error::Result;

pub use feed::SymbolFeed;

#[derive(Default)]
struct SubscriptionState {
    clients: HashMap<ClientId, HashSet<Symbol>>,
    ref_counts: HashMap<Symbol, usize>,
}

impl SubscriptionState {
    /// Add symbols to a client's set. Returns the symbols whose count went `0 → 1`.
    fn add(&mut self, client: &ClientId, symbols: &[Symbol]) -> Vec<Symbol> {
        let held = self.clients.entry(client.clone()).or_default();
        let mut added = Vec::new();
        for symbol in symbols {
            if !held.insert(symbol.clone()) {
                continue;
            }
            let count = self.ref_counts.entry(symbol.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                added.push(symbol.clone());
            }
        }
        added
    }

    /// Drop symbols from a client's set. Returns the symbols whose count went `1 → 0`.
    fn remove(&mut self, client: &ClientId, symbols: &[Symbol]) -> Vec<Symbol> {
        let Some(held) = self.clients.get_mut(client) else {
            return Vec::new();
        };
        let dropped: Vec<Symbol> = symbols
            .iter()
            .filter(|s| held.remove(*s))
            .cloned()
            .collect();
        self.release(&dropped)
    }

    /// Forget a client entirely. Returns the symbols whose count went `1 → 0`.
    fn remove_client(&mut self, client: &ClientId) -> Vec<Symbol> {
        let Some(held) = self.clients.remove(client) else {
            return Vec::new();
        };
        let dropped: Vec<Symbol> = held.into_iter().collect();
        self.release(&dropped)
    }

    fn release(&mut self, symbols: &[Symbol]) -> Vec<Symbol> {
        let mut released = Vec::new();
        for symbol in symbols {
            let Some(count) = self.ref_counts.get_mut(symbol) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.ref_counts.remove(symbol);
                released.push(symbol.clone());
            }
        }
        released
    }
}

pub struct StreamClientStateManager {
    feed: Arc<dyn SymbolFeed>,
    state: RwLock<SubscriptionState>,
    /// One async gate per symbol; upstream calls for a symbol run under it.
    gates: Mutex<HashMap<Symbol, Arc<tokio::sync::Mutex<()>>>>,
}

impl StreamClientStateManager {
    pub fn new(feed: Arc<dyn SymbolFeed>) -> Self {
        Self {
            feed,
            state: RwLock::new(SubscriptionState::default()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Add `symbols` to `client`'s set.
    ///
    /// Returns the symbols that became newly needed at the provider level;
    /// symbols the client already held, or other clients already keep alive,
    /// are not included.
    pub async fn subscribe(&self, client: &ClientId, symbols: &[Symbol]) -> Vec<Symbol> {
        let added = self.state.write().add(client, symbols);
        if !added.is_empty() {
            debug!(client = %client, symbols = added.len(), "Subscribing symbols upstream");
            self.sync_upstream(client, &added).await;
        }
        added
    }

    /// Remove `symbols` from `client`'s set.
    ///
    /// Returns the symbols no client holds anymore; they are unsubscribed
    /// upstream.
    pub async fn unsubscribe(&self, client: &ClientId, symbols: &[Symbol]) -> Vec<Symbol> {
        let released = self.state.write().remove(client, symbols);
        self.sync_upstream(client, &released).await;
        released
    }

    /// Drop every subscription `client` holds.
    pub async fn on_client_disconnect(&self, client: &ClientId) -> Vec<Symbol> {
        let released = self.state.write().remove_client(client);
        self.sync_upstream(client, &released).await;
        if !released.is_empty() {
            info!(client = %client, released = released.len(), "Client subscriptions released");
        }
        released
    }

    /// Re-send the full active symbol set to the feed.
    ///
    /// The feed skips codes already subscribed on its current session, so
    /// replaying is idempotent. Returns how many symbols were replayed.
    ///
    /// # Errors
    ///
    /// Propagates the feed error; the active set is unchanged.
    pub async fn replay(&self) -> Result<usize> {
        let active = self.active_symbols();
        if active.is_empty() {
            return Ok(0);
        }
        let _gates = self.lock_gates(&active).await;
        let wanted: Vec<Symbol> = {
            let state = self.state.read();
            active
                .into_iter()
                .filter(|s| state.ref_counts.contains_key(s))
                .collect()
        };
        if wanted.is_empty() {
            return Ok(0);
        }
        self.feed.subscribe(&wanted).await?;
        info!(symbols = wanted.len(), "Replayed subscriptions");
        Ok(wanted.len())
    }

    /// Whether the feed needs re-arming: symbols are wanted but the upstream
    /// stream is not live.
    pub fn needs_rearm(&self) -> bool {
        !self.state.read().ref_counts.is_empty() && !self.feed.is_live()
    }

    /// Symbols with at least one subscriber, sorted.
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let state = self.state.read();
        let sorted: BTreeSet<&Symbol> = state.ref_counts.keys().collect();
        sorted.into_iter().cloned().collect()
    }

    /// Clients currently subscribed to `symbol`.
    pub fn subscribers(&self, symbol: &Symbol) -> Vec<ClientId> {
        self.state
            .read()
            .clients
            .iter()
            .filter(|(_, held)| held.contains(symbol))
            .map(|(client, _)| client.clone())
            .collect()
    }

    pub fn client_symbols(&self, client: &ClientId) -> HashSet<Symbol> {
        self.state
            .read()
            .clients
            .get(client)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ref_count(&self, symbol: &Symbol) -> usize {
        self.state.read().ref_counts.get(symbol).copied().unwrap_or(0)
    }

    pub fn client_count(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Bring the upstream subscription of `changed` in line with the
    /// current reference counts.
    ///
    /// Runs under the gates of `changed` only, so provider I/O for one
    /// symbol never blocks mutations of unrelated symbols.
    async fn sync_upstream(&self, client: &ClientId, changed: &[Symbol]) {
        if changed.is_empty() {
            return;
        }
        let gates = self.lock_gates(changed).await;
        let (wanted, unwanted): (Vec<Symbol>, Vec<Symbol>) = {
            let state = self.state.read();
            changed
                .iter()
                .cloned()
                .partition(|s| state.ref_counts.contains_key(s))
        };

        if !wanted.is_empty() {
            if let Err(e) = self.feed.subscribe(&wanted).await {
                warn!(
                    client = %client,
                    symbols = wanted.len(),
                    error = %e,
                    "Upstream subscribe failed; will be replayed on recovery"
                );
            }
        }
        if !unwanted.is_empty() {
            if let Err(e) = self.feed.unsubscribe(&unwanted).await {
                warn!(
                    client = %client,
                    symbols = unwanted.len(),
                    error = %e,
                    "Upstream unsubscribe failed"
                );
            }
            self.retire_gates(&unwanted);
        }
        drop(gates);
    }

    /// Lock the gates of `symbols` in sorted order.
    async fn lock_gates(&self, symbols: &[Symbol]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<&Symbol> = symbols.iter().collect();
        sorted.sort();
        sorted.dedup();
        let gates: Vec<Arc<tokio::sync::Mutex<()>>> = {
            let mut map = self.gates.lock();
            sorted
                .into_iter()
                .map(|s| Arc::clone(map.entry(s.clone()).or_default()))
                .collect()
        };
        let mut guards = Vec::with_capacity(gates.len());
        for gate in gates {
            guards.push(gate.lock_owned().await);
        }
        guards
    }

    /// Drop gates nobody else holds or waits on. Caller holds each gate once.
    fn retire_gates(&self, symbols: &[Symbol]) {
        let mut map = self.gates.lock();
        for symbol in symbols {
            if map.get(symbol).is_some_and(|g| Arc::strong_count(g) == 2) {
                map.remove(symbol);
            }
        }
    }
}

#[cfg(test)]
mod tests;
