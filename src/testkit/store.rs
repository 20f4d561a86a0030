//! Failing and scripted storage collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{ProviderId, Symbol, SymbolMapping};
use crate::error::{Error, Result};
use crate::port::{AtomicScript, KeyValueStore, RuleRepository, ScriptOutcome};

/// A backing store that is always down.
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::backend("get", "connection refused"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Err(Error::backend("set", "connection refused"))
    }

    async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<String>>> {
        Err(Error::backend("mget", "connection refused"))
    }

    async fn mset(&self, _entries: Vec<(String, String)>, _ttl: Option<Duration>) -> Result<()> {
        Err(Error::backend("mset", "connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(Error::backend("delete", "connection refused"))
    }

    async fn eval(&self, _script: AtomicScript) -> Result<ScriptOutcome> {
        Err(Error::backend("eval", "connection refused"))
    }
}

/// In-memory rule store that counts reads and can be slowed or taken down.
#[derive(Default)]
pub struct ScriptedRuleRepository {
    rules: Mutex<HashMap<(ProviderId, Symbol), SymbolMapping>>,
    find_calls: AtomicU32,
    find_one_calls: AtomicU32,
    reverse_calls: AtomicU32,
    saves: AtomicU32,
    delay: Mutex<Option<Duration>>,
    down: AtomicBool,
}

impl ScriptedRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mappings: impl IntoIterator<Item = SymbolMapping>) -> Self {
        let repo = Self::new();
        for m in mappings {
            repo.insert(m);
        }
        repo
    }

    /// Write directly to the store, bypassing any cache in front of it.
    pub fn insert(&self, mapping: SymbolMapping) {
        self.rules
            .lock()
            .insert((mapping.provider.clone(), mapping.canonical.clone()), mapping);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn find_calls(&self) -> u32 {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn find_one_calls(&self) -> u32 {
        self.find_one_calls.load(Ordering::SeqCst)
    }

    pub fn reverse_calls(&self) -> u32 {
        self.reverse_calls.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::backend("rules", "rule store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleRepository for ScriptedRuleRepository {
    async fn find(&self, provider: &ProviderId, canonicals: &[Symbol]) -> Result<Vec<SymbolMapping>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        let rules = self.rules.lock();
        Ok(canonicals
            .iter()
            .filter_map(|c| rules.get(&(provider.clone(), c.clone())).cloned())
            .collect())
    }

    async fn find_one(
        &self,
        provider: &ProviderId,
        canonical: &Symbol,
    ) -> Result<Option<SymbolMapping>> {
        self.find_one_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        Ok(self
            .rules
            .lock()
            .get(&(provider.clone(), canonical.clone()))
            .cloned())
    }

    async fn find_by_provider_code(
        &self,
        provider: &ProviderId,
        provider_code: &str,
    ) -> Result<Option<SymbolMapping>> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        Ok(self
            .rules
            .lock()
            .values()
            .find(|m| &m.provider == provider && m.provider_code == provider_code)
            .cloned())
    }

    async fn save(&self, mapping: &SymbolMapping) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::backend("rules", "rule store offline"));
        }
        self.insert(mapping.clone());
        Ok(())
    }
}
