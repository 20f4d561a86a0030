//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.
//! Avoids each test module defining its own slightly-different defaults.

use crate::infrastructure::config::{
    BroadcastConfig, CacheConfig, PoolConfig, RecoveryConfig, StrategyConfig,
};

/// Pool config with the given ceilings and a one-failure degrade threshold.
///
/// Per-origin ceiling equals `max_global`; override individual fields on the
/// returned struct where a test needs something else.
pub fn pool(max_global: usize, max_per_key: usize) -> PoolConfig {
    PoolConfig {
        max_global,
        max_per_key,
        max_per_origin: max_global,
        idle_timeout_secs: 60,
        health_check_interval_secs: 1,
        ping_timeout_ms: 100,
        connect_timeout_ms: 200,
        call_timeout_ms: 200,
        failure_threshold: 1,
        unavailable_cooldown_secs: 30,
        update_channel_capacity: 1_024,
    }
}

/// Recovery config with millisecond backoff so recovery tests finish quickly.
pub fn recovery(max_retries: u32) -> RecoveryConfig {
    RecoveryConfig {
        base_delay_ms: 10,
        max_delay_ms: 80,
        max_retries,
        scan_interval_ms: 50,
        shutdown_timeout_ms: 500,
    }
}

/// Small tiers with short, distinct TTLs.
pub fn cache() -> CacheConfig {
    CacheConfig {
        l1_capacity: 4,
        l1_ttl_secs: 10,
        l2_capacity: 16,
        l2_ttl_secs: 60,
        sweep_interval_secs: 1,
        pressure_evict_ratio: 0.5,
    }
}

pub fn strategy() -> StrategyConfig {
    StrategyConfig {
        min_samples: 4,
        ..StrategyConfig::default()
    }
}

pub fn broadcast(batch_width: usize) -> BroadcastConfig {
    BroadcastConfig {
        batch_width,
        send_timeout_ms: 50,
    }
}
