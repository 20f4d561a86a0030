//! Resource budget used to derive host pressure.

use std::time::Duration;

use serde::Deserialize;

/// Memory and CPU budget the gateway measures itself against.
///
/// Memory use is estimated from cached entries, so `bytes_per_entry` is a
/// sizing guess rather than a measurement. CPU load is read off the provider
/// update backlog: a pump that cannot keep up fills its channel.
#[derive(Debug, Clone, Deserialize)]
pub struct PressureConfig {
    /// Memory budget for cached data in bytes.
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,
    /// Estimated footprint of one cached entry in bytes.
    #[serde(default = "default_bytes_per_entry")]
    pub bytes_per_entry: u64,
    /// Budget fraction above which memory pressure is elevated.
    #[serde(default = "default_memory_target")]
    pub memory_target: f64,
    /// Update backlog fraction above which CPU pressure is elevated.
    #[serde(default = "default_cpu_target")]
    pub cpu_target: f64,
    /// How often the orchestrator re-reads pressure.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

const fn default_max_memory_bytes() -> u64 {
    512 * 1024 * 1024
}

const fn default_bytes_per_entry() -> u64 {
    1024
}

const fn default_memory_target() -> f64 {
    0.5
}

const fn default_cpu_target() -> f64 {
    0.5
}

const fn default_sample_interval_ms() -> u64 {
    1_000
}

impl PressureConfig {
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: default_max_memory_bytes(),
            bytes_per_entry: default_bytes_per_entry(),
            memory_target: default_memory_target(),
            cpu_target: default_cpu_target(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}
