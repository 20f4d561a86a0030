//! Connection pool and recovery configuration.

use std::time::Duration;

use serde::Deserialize;

/// Ceilings and health-check settings for the provider connection pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum open connections across all providers and credentials.
    #[serde(default = "default_max_global")]
    pub max_global: usize,
    /// Maximum open connections per `(provider, credential)` key.
    #[serde(default = "default_max_per_key")]
    pub max_per_key: usize,
    /// Maximum open connections attributed to one request origin.
    #[serde(default = "default_max_per_origin")]
    pub max_per_origin: usize,
    /// Idle connections older than this are closed by the health task.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Interval between health checks.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Per-ping timeout (milliseconds).
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Provider connect handshake timeout (milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for quote, subscribe and unsubscribe calls (milliseconds).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Consecutive failed health checks before a connection is marked DEGRADED.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long a provider stays unavailable after recovery gives up.
    #[serde(default = "default_unavailable_cooldown_secs")]
    pub unavailable_cooldown_secs: u64,
    /// Provider update channel capacity (bounded to prevent unbounded memory growth).
    #[serde(default = "default_update_channel_capacity")]
    pub update_channel_capacity: usize,
}

const fn default_max_global() -> usize {
    64
}

const fn default_max_per_key() -> usize {
    8
}

const fn default_max_per_origin() -> usize {
    16
}

const fn default_idle_timeout_secs() -> u64 {
    300
}

const fn default_health_check_interval_secs() -> u64 {
    15
}

const fn default_ping_timeout_ms() -> u64 {
    2_000
}

const fn default_connect_timeout_ms() -> u64 {
    5_000
}

const fn default_call_timeout_ms() -> u64 {
    5_000
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_unavailable_cooldown_secs() -> u64 {
    60
}

const fn default_update_channel_capacity() -> usize {
    10_000
}

impl PoolConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn unavailable_cooldown(&self) -> Duration {
        Duration::from_secs(self.unavailable_cooldown_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_global: default_max_global(),
            max_per_key: default_max_per_key(),
            max_per_origin: default_max_per_origin(),
            idle_timeout_secs: default_idle_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            ping_timeout_ms: default_ping_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            unavailable_cooldown_secs: default_unavailable_cooldown_secs(),
            update_channel_capacity: default_update_channel_capacity(),
        }
    }
}

/// Backoff and retry budget for the stream recovery worker.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Delay before the first reconnect attempt (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the backoff delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Reconnect attempts per outage before the connection is closed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How often the worker scans the pool for degraded connections.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Grace period for in-flight recoveries on shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    6
}

fn default_scan_interval_ms() -> u64 {
    1_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl RecoveryConfig {
    /// `base_delay × 2^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            scan_interval_ms: default_scan_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}
