//! Symbol-mapper cache and cache-strategy configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::CacheStrategy;

/// Tier capacities, TTLs and sweep settings for the symbol mapper cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries in the L1 (snapshot) tier.
    #[serde(default = "default_l1_capacity")]
    pub l1_capacity: usize,
    /// L1 entry lifetime in seconds.
    #[serde(default = "default_l1_ttl_secs")]
    pub l1_ttl_secs: u64,
    /// Maximum entries in the L2 (LRU) tier.
    #[serde(default = "default_l2_capacity")]
    pub l2_capacity: usize,
    /// L2 entry lifetime in seconds.
    #[serde(default = "default_l2_ttl_secs")]
    pub l2_ttl_secs: u64,
    /// Interval of the background expiry sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Fraction of each tier evicted on an elevated pressure signal.
    /// Doubled (up to 1.0) on a critical signal.
    #[serde(default = "default_pressure_evict_ratio")]
    pub pressure_evict_ratio: f64,
}

const fn default_l1_capacity() -> usize {
    1_024
}

const fn default_l1_ttl_secs() -> u64 {
    60
}

const fn default_l2_capacity() -> usize {
    16_384
}

const fn default_l2_ttl_secs() -> u64 {
    600
}

const fn default_sweep_interval_secs() -> u64 {
    30
}

const fn default_pressure_evict_ratio() -> f64 {
    0.25
}

impl CacheConfig {
    #[must_use]
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs)
    }

    #[must_use]
    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: default_l1_capacity(),
            l1_ttl_secs: default_l1_ttl_secs(),
            l2_capacity: default_l2_capacity(),
            l2_ttl_secs: default_l2_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            pressure_evict_ratio: default_pressure_evict_ratio(),
        }
    }
}

/// TTL table and degradation policy for the smart cache orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_strong_ttl_secs")]
    pub strong_ttl_secs: u64,
    #[serde(default = "default_weak_ttl_secs")]
    pub weak_ttl_secs: u64,
    #[serde(default = "default_market_open_ttl_secs")]
    pub market_open_ttl_secs: u64,
    #[serde(default = "default_market_closed_ttl_secs")]
    pub market_closed_ttl_secs: u64,
    #[serde(default = "default_adaptive_base_ttl_secs")]
    pub adaptive_base_ttl_secs: u64,
    #[serde(default = "default_adaptive_min_ttl_secs")]
    pub adaptive_min_ttl_secs: u64,
    #[serde(default = "default_adaptive_max_ttl_secs")]
    pub adaptive_max_ttl_secs: u64,
    /// Backend error rate (0.0-1.0) above which strategies degrade.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    /// Observations required before the error rate is trusted.
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
    /// TTL multiplier applied per pressure step (elevated = ×m, critical = ×m²).
    #[serde(default = "default_pressure_multiplier")]
    pub pressure_multiplier: f64,
    /// Strategy used while the backend is failing.
    #[serde(default = "default_fallback_strategy")]
    pub fallback_strategy: CacheStrategy,
    /// Capacity of the generic value cache.
    #[serde(default = "default_value_cache_capacity")]
    pub value_cache_capacity: usize,
}

const fn default_strong_ttl_secs() -> u64 {
    5
}

const fn default_weak_ttl_secs() -> u64 {
    900
}

const fn default_market_open_ttl_secs() -> u64 {
    30
}

const fn default_market_closed_ttl_secs() -> u64 {
    3_600
}

const fn default_adaptive_base_ttl_secs() -> u64 {
    60
}

const fn default_adaptive_min_ttl_secs() -> u64 {
    10
}

const fn default_adaptive_max_ttl_secs() -> u64 {
    600
}

const fn default_error_rate_threshold() -> f64 {
    0.3
}

const fn default_min_samples() -> u64 {
    20
}

const fn default_pressure_multiplier() -> f64 {
    1.5
}

const fn default_fallback_strategy() -> CacheStrategy {
    CacheStrategy::WeakTimeliness
}

const fn default_value_cache_capacity() -> usize {
    8_192
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            strong_ttl_secs: default_strong_ttl_secs(),
            weak_ttl_secs: default_weak_ttl_secs(),
            market_open_ttl_secs: default_market_open_ttl_secs(),
            market_closed_ttl_secs: default_market_closed_ttl_secs(),
            adaptive_base_ttl_secs: default_adaptive_base_ttl_secs(),
            adaptive_min_ttl_secs: default_adaptive_min_ttl_secs(),
            adaptive_max_ttl_secs: default_adaptive_max_ttl_secs(),
            error_rate_threshold: default_error_rate_threshold(),
            min_samples: default_min_samples(),
            pressure_multiplier: default_pressure_multiplier(),
            fallback_strategy: default_fallback_strategy(),
            value_cache_capacity: default_value_cache_capacity(),
        }
    }
}
