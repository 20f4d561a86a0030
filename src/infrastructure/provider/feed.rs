//! Stream feed bound to one (provider, credential).
//!
//! Translates canonical symbols into provider codes through the mapping
//! cache and drives the pool's shared stream connection. The code each
//! symbol was subscribed under is remembered, so an unsubscribe releases
//! that code even if the mapping rule has been renamed since.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::ConnectionPoolManager;
use crate::domain::{CredentialId, ProviderId, Symbol};
use crate::error::Result;
use crate::infrastructure::cache::{Lookup, SymbolMapperCache};
use crate::infrastructure::subscription::SymbolFeed;

pub struct ProviderFeed {
    pool: Arc<ConnectionPoolManager>,
    mapper: SymbolMapperCache,
    provider: ProviderId,
    credential: CredentialId,
    subscribed: parking_lot::Mutex<HashMap<Symbol, String>>,
}

impl ProviderFeed {
    pub fn new(
        pool: Arc<ConnectionPoolManager>,
        mapper: SymbolMapperCache,
        provider: ProviderId,
        credential: CredentialId,
    ) -> Self {
        Self {
            pool,
            mapper,
            provider,
            credential,
            subscribed: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Provider codes for `symbols`. Unmapped symbols are sent verbatim.
    async fn codes(&self, symbols: &[Symbol]) -> Vec<(Symbol, String)> {
        self.mapper
            .batch_get(&self.provider, symbols)
            .await
            .into_iter()
            .map(|(symbol, lookup)| {
                let code = match lookup {
                    Lookup::Hit { mapping, .. } => mapping.provider_code,
                    Lookup::Miss | Lookup::Unknown => {
                        debug!(provider = %self.provider, symbol = %symbol, "No mapping rule, using canonical symbol");
                        symbol.as_str().to_string()
                    }
                };
                (symbol, code)
            })
            .collect()
    }
}

#[async_trait]
impl SymbolFeed for ProviderFeed {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<()> {
        let resolved = self.codes(symbols).await;
        let codes: Vec<String> = resolved.iter().map(|(_, code)| code.clone()).collect();
        self.pool
            .stream_subscribe(&self.provider, &self.credential, &codes)
            .await?;
        self.subscribed.lock().extend(resolved);
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<()> {
        let codes: Vec<String> = {
            let mut subscribed = self.subscribed.lock();
            symbols.iter().filter_map(|s| subscribed.remove(s)).collect()
        };
        if codes.is_empty() {
            return Ok(());
        }
        self.pool
            .stream_unsubscribe(&self.provider, &self.credential, &codes)
            .await
            .map(|_| ())
    }

    fn is_live(&self) -> bool {
        self.pool.has_live_stream(&self.provider, &self.credential)
    }
}
