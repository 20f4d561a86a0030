//! Durable symbol-mapping rule repository port.
//!
//! The repository is the single source of truth for [`SymbolMapping`]s. The
//! in-memory tiers of the symbol mapper cache sit in front of it and are never
//! authoritative.

use async_trait::async_trait;

use crate::domain::{ProviderId, Symbol, SymbolMapping};
use crate::error::Result;

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Fetch all mappings for `canonicals` under `provider` in one round trip.
    ///
    /// Missing symbols are simply absent from the result.
    async fn find(&self, provider: &ProviderId, canonicals: &[Symbol]) -> Result<Vec<SymbolMapping>>;

    async fn find_one(&self, provider: &ProviderId, canonical: &Symbol)
        -> Result<Option<SymbolMapping>>;

    /// Reverse lookup: provider code to mapping.
    async fn find_by_provider_code(
        &self,
        provider: &ProviderId,
        provider_code: &str,
    ) -> Result<Option<SymbolMapping>>;

    /// Insert or replace the mapping keyed by `(provider, canonical)`.
    async fn save(&self, mapping: &SymbolMapping) -> Result<()>;
}
