//! Rule repository backed by a [`KeyValueStore`].
//!
//! Mappings are stored as JSON under `rule:{provider}:{canonical}`. A
//! secondary `rule-code:{provider}:{code}` key holds the canonical symbol so
//! reverse lookups cost two reads instead of a scan.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{ProviderId, Symbol, SymbolMapping};
use crate::error::Result;
use crate::port::{KeyValueStore, RuleRepository};

pub struct StoreRuleRepository {
    store: Arc<dyn KeyValueStore>,
}

fn forward_key(provider: &ProviderId, canonical: &Symbol) -> String {
    format!("rule:{provider}:{canonical}")
}

fn reverse_key(provider: &ProviderId, code: &str) -> String {
    format!("rule-code:{provider}:{code}")
}

impl StoreRuleRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn decode(key: &str, raw: &str) -> Option<SymbolMapping> {
        match serde_json::from_str(raw) {
            Ok(mapping) => Some(mapping),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping undecodable mapping");
                None
            }
        }
    }
}

#[async_trait]
impl RuleRepository for StoreRuleRepository {
    async fn find(&self, provider: &ProviderId, canonicals: &[Symbol]) -> Result<Vec<SymbolMapping>> {
        if canonicals.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = canonicals.iter().map(|c| forward_key(provider, c)).collect();
        let values = self.store.mget(&keys).await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, raw)| raw.and_then(|raw| Self::decode(key, &raw)))
            .collect())
    }

    async fn find_one(
        &self,
        provider: &ProviderId,
        canonical: &Symbol,
    ) -> Result<Option<SymbolMapping>> {
        let key = forward_key(provider, canonical);
        Ok(self
            .store
            .get(&key)
            .await?
            .and_then(|raw| Self::decode(&key, &raw)))
    }

    async fn find_by_provider_code(
        &self,
        provider: &ProviderId,
        provider_code: &str,
    ) -> Result<Option<SymbolMapping>> {
        let Some(canonical) = self.store.get(&reverse_key(provider, provider_code)).await? else {
            return Ok(None);
        };
        let mapping = self.find_one(provider, &Symbol::new(canonical)).await?;
        // A reverse key can outlive a rename; only trust it if it still agrees.
        Ok(mapping.filter(|m| m.provider_code == provider_code))
    }

    async fn save(&self, mapping: &SymbolMapping) -> Result<()> {
        let key = forward_key(&mapping.provider, &mapping.canonical);
        if let Some(previous) = self.find_one(&mapping.provider, &mapping.canonical).await? {
            if previous.provider_code != mapping.provider_code {
                self.store
                    .delete(&reverse_key(&mapping.provider, &previous.provider_code))
                    .await?;
            }
        }

        self.store
            .mset(
                vec![
                    (key, serde_json::to_string(mapping)?),
                    (
                        reverse_key(&mapping.provider, &mapping.provider_code),
                        mapping.canonical.to_string(),
                    ),
                ],
                None,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::outbound::memory::MemoryStore;
    use crate::domain::{RuleType, SystemClock};
    use crate::testkit::store::FailingStore;

    fn repo() -> StoreRuleRepository {
        StoreRuleRepository::new(Arc::new(MemoryStore::new(Arc::new(SystemClock))))
    }

    fn mapping(canonical: &str, code: &str) -> SymbolMapping {
        SymbolMapping::new(
            ProviderId::new("alpha"),
            Symbol::new(canonical),
            code,
            RuleType::Suffix,
        )
    }

    #[tokio::test]
    async fn save_then_find_both_directions() {
        let repo = repo();
        let provider = ProviderId::new("alpha");
        repo.save(&mapping("TENCENT", "0700.HK")).await.unwrap();
        repo.save(&mapping("HSBC", "0005.HK")).await.unwrap();

        let found = repo
            .find(
                &provider,
                &[Symbol::new("TENCENT"), Symbol::new("NOPE"), Symbol::new("HSBC")],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let reverse = repo
            .find_by_provider_code(&provider, "0700.HK")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reverse.canonical, Symbol::new("TENCENT"));
    }

    #[tokio::test]
    async fn rename_drops_old_reverse_key() {
        let repo = repo();
        let provider = ProviderId::new("alpha");
        repo.save(&mapping("TENCENT", "700.HK")).await.unwrap();
        repo.save(&mapping("TENCENT", "0700.HK")).await.unwrap();

        assert!(repo
            .find_by_provider_code(&provider, "700.HK")
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .find_by_provider_code(&provider, "0700.HK")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let repo = StoreRuleRepository::new(Arc::new(FailingStore));
        let err = repo
            .find_one(&ProviderId::new("alpha"), &Symbol::new("AAPL"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
