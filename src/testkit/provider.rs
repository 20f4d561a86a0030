//! Scripted provider clients.
//!
//! A [`ProviderScript`] is shared by every [`ScriptedProvider`] a factory
//! creates, so tests can script outages and count calls across reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::domain::{CredentialId, ProviderId};
use crate::error::{Error, Result};
use crate::port::{ProviderClient, ProviderFactory, Quote, UpdateCallback};

#[derive(Default)]
pub struct ProviderScript {
    connects: AtomicU32,
    pings: AtomicU32,
    quotes: AtomicU32,
    closes: AtomicU32,
    clients: AtomicU32,
    next_instance: AtomicU64,
    fail_connects: AtomicU32,
    connect_down: AtomicBool,
    ping_down: AtomicBool,
    subscribe_down: AtomicBool,
    connect_delay_ms: AtomicU64,
    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<String>>,
    callbacks: Mutex<HashMap<u64, UpdateCallback>>,
}

impl ProviderScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory producing a fresh [`ScriptedProvider`] bound to this script.
    pub fn factory(self: &Arc<Self>) -> ProviderFactory {
        let script = Arc::clone(self);
        Arc::new(move |_provider: &ProviderId, _credential: &CredentialId| {
            script.clients.fetch_add(1, Ordering::SeqCst);
            let instance = script.next_instance.fetch_add(1, Ordering::SeqCst);
            Arc::new(ScriptedProvider {
                script: Arc::clone(&script),
                instance,
            }) as Arc<dyn ProviderClient>
        })
    }

    // ---- Scripting ----

    /// Fail the next `n` connect attempts, then succeed.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Make every connect fail until cleared.
    pub fn set_connect_down(&self, down: bool) {
        self.connect_down.store(down, Ordering::SeqCst);
    }

    pub fn set_ping_down(&self, down: bool) {
        self.ping_down.store(down, Ordering::SeqCst);
    }

    pub fn set_subscribe_down(&self, down: bool) {
        self.subscribe_down.store(down, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Deliver a quote to every open client's update callback.
    pub fn push(&self, symbol: &str, data: serde_json::Value) {
        let callbacks: Vec<UpdateCallback> = self.callbacks.lock().values().cloned().collect();
        for callback in callbacks {
            callback(Quote {
                symbol: symbol.to_string(),
                data: data.clone(),
                timestamp: Utc::now(),
            });
        }
    }

    // ---- Observations ----

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn quote_count(&self) -> u32 {
        self.quotes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of clients the factory has built.
    pub fn client_count(&self) -> u32 {
        self.clients.load(Ordering::SeqCst)
    }

    /// Every code passed to `subscribe`, in call order.
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().clone()
    }

    pub fn subscribe_count(&self, code: &str) -> usize {
        self.subscribe_calls
            .lock()
            .iter()
            .filter(|c| c.as_str() == code)
            .count()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.unsubscribe_calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.subscribe_calls.lock().clear();
        self.unsubscribe_calls.lock().clear();
    }
}

pub struct ScriptedProvider {
    script: Arc<ProviderScript>,
    instance: u64,
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn connect(&self) -> Result<()> {
        let delay = self.script.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.script.connects.fetch_add(1, Ordering::SeqCst);

        if self.script.connect_down.load(Ordering::SeqCst) {
            return Err(Error::provider_unavailable("scripted", "connect refused"));
        }
        let remaining = self.script.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.script.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::provider_unavailable("scripted", "scripted connect failure"));
        }
        Ok(())
    }

    async fn quote(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        self.script.quotes.fetch_add(1, Ordering::SeqCst);
        Ok(symbols
            .iter()
            .map(|s| Quote {
                symbol: s.clone(),
                data: serde_json::json!({ "price": 100.0 }),
                timestamp: Utc::now(),
            })
            .collect())
    }

    async fn subscribe(&self, symbols: &[String], on_update: UpdateCallback) -> Result<()> {
        if self.script.subscribe_down.load(Ordering::SeqCst) {
            return Err(Error::provider_unavailable("scripted", "subscribe rejected"));
        }
        self.script
            .subscribe_calls
            .lock()
            .extend(symbols.iter().cloned());
        self.script.callbacks.lock().insert(self.instance, on_update);
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        self.script
            .unsubscribe_calls
            .lock()
            .extend(symbols.iter().cloned());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.script.pings.fetch_add(1, Ordering::SeqCst);
        if self.script.ping_down.load(Ordering::SeqCst) {
            return Err(Error::provider_unavailable("scripted", "ping failed"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        self.script.callbacks.lock().remove(&self.instance);
        Ok(())
    }
}
