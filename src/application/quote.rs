//! Request-path quote snapshots.
//!
//! Resolves the provider code through the mapping cache and reads through
//! the cache orchestrator, so repeated snapshot requests within the chosen
//! TTL never reach the provider.

use std::sync::Arc;

use crate::domain::{CredentialId, DataClassification, ProviderId, Symbol};
use crate::error::{Error, Result};
use crate::infrastructure::cache::SymbolMapperCache;
use crate::infrastructure::provider::ConnectionPoolManager;

use super::cache::SmartCacheOrchestrator;

pub struct QuoteService {
    pool: Arc<ConnectionPoolManager>,
    mapper: SymbolMapperCache,
    orchestrator: Arc<SmartCacheOrchestrator>,
    provider: ProviderId,
    credential: CredentialId,
}

impl QuoteService {
    pub fn new(
        pool: Arc<ConnectionPoolManager>,
        mapper: SymbolMapperCache,
        orchestrator: Arc<SmartCacheOrchestrator>,
        provider: ProviderId,
        credential: CredentialId,
    ) -> Self {
        Self {
            pool,
            mapper,
            orchestrator,
            provider,
            credential,
        }
    }

    /// Latest quote payload for `symbol`.
    ///
    /// # Errors
    ///
    /// Pool and provider errors when the value is not cached.
    pub async fn snapshot(&self, symbol: &Symbol) -> Result<serde_json::Value> {
        let code = self
            .mapper
            .get(&self.provider, symbol)
            .await
            .into_mapping()
            .map_or_else(|| symbol.as_str().to_string(), |m| m.provider_code);
        let key = format!("quote:{}:{}", self.provider, symbol);

        self.orchestrator
            .get_or_fetch(&key, DataClassification::RealtimeQuote, || async {
                let quotes = self
                    .pool
                    .quote(&self.provider, &self.credential, std::slice::from_ref(&code))
                    .await?;
                quotes.into_iter().next().map(|q| q.data).ok_or_else(|| {
                    Error::provider_unavailable(&self.provider, format!("no quote returned for {code}"))
                })
            })
            .await
    }
}
