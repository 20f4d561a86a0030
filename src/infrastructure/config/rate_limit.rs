//! Rate-limit policies.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    FixedWindow,
    SlidingWindow,
}

/// `{requests, window}` quota plus algorithm selection.
///
/// `window` uses the `<integer><unit>` form (`30s`, `1m`, `1h`, `1d`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,
    pub requests: u64,
    pub window: String,
    /// Deny instead of allow when the backing store is unreachable.
    #[serde(default)]
    pub fail_closed: bool,
}

impl RateLimitPolicy {
    pub fn fixed(requests: u64, window: impl Into<String>) -> Self {
        Self {
            algorithm: RateLimitAlgorithm::FixedWindow,
            requests,
            window: window.into(),
            fail_closed: false,
        }
    }

    pub fn sliding(requests: u64, window: impl Into<String>) -> Self {
        Self {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            requests,
            window: window.into(),
            fail_closed: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Policy for keys without an override.
    #[serde(default = "default_policy")]
    pub default: RateLimitPolicy,
    /// Policy used by the connection pool's admission gate.
    #[serde(default = "default_admission_policy")]
    pub admission: RateLimitPolicy,
    /// Per-credential overrides keyed by credential ID.
    #[serde(default)]
    pub credentials: HashMap<String, RateLimitPolicy>,
}

fn default_enabled() -> bool {
    true
}

fn default_policy() -> RateLimitPolicy {
    RateLimitPolicy::fixed(600, "1m")
}

fn default_admission_policy() -> RateLimitPolicy {
    RateLimitPolicy::sliding(30, "1m")
}

impl RateLimitConfig {
    /// Policy applying to `key`: its override if any, the default otherwise.
    #[must_use]
    pub fn policy_for(&self, key: &str) -> &RateLimitPolicy {
        self.credentials.get(key).unwrap_or(&self.default)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default: default_policy(),
            admission: default_admission_policy(),
            credentials: HashMap::new(),
        }
    }
}
