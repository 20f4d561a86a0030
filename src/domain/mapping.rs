//! Canonical ⇄ provider symbol mapping rules.

use serde::{Deserialize, Serialize};

use super::id::{ProviderId, Symbol};

/// How a provider code is derived from the canonical symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Provider appends an exchange suffix (`700` -> `0700.HK`).
    Suffix,
    /// Provider prepends a market prefix (`600000` -> `SH600000`).
    Prefix,
    /// Provider uses a numeric code.
    Numeric,
    /// Anything else; the code is stored verbatim.
    Custom,
}

/// A single mapping rule, keyed by `(provider, canonical)`.
///
/// The durable copy lives in the rule repository; cache tiers only hold
/// copies of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMapping {
    pub provider: ProviderId,
    pub canonical: Symbol,
    pub provider_code: String,
    pub rule_type: RuleType,
    pub active: bool,
}

impl SymbolMapping {
    pub fn new(
        provider: ProviderId,
        canonical: Symbol,
        provider_code: impl Into<String>,
        rule_type: RuleType,
    ) -> Self {
        Self {
            provider,
            canonical,
            provider_code: provider_code.into(),
            rule_type,
            active: true,
        }
    }

    /// Return a copy with the active flag cleared.
    #[must_use]
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}
