//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all gateway settings.
//! Configuration is loaded from a TOML file; every section and field has a
//! default so an empty file is a valid configuration.
//!
//! # Example
//!
//! ```no_run
//! use quotegate::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::cache::{CacheConfig, StrategyConfig};
use super::logging::LoggingConfig;
use super::pool::{PoolConfig, RecoveryConfig};
use super::pressure::PressureConfig;
use super::rate_limit::{RateLimitConfig, RateLimitPolicy};
use super::server::{BroadcastConfig, ServerConfig, UpstreamConfig};
use crate::error::{ConfigError, Result};
use crate::infrastructure::rate_limit::parse_window;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub pressure: PressureConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: &str| -> crate::error::Error {
            ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            }
            .into()
        };

        if self.pool.max_global == 0 {
            return Err(invalid("pool.max_global", "must be > 0"));
        }
        if self.pool.max_per_key == 0 || self.pool.max_per_key > self.pool.max_global {
            return Err(invalid("pool.max_per_key", "must be > 0 and <= max_global"));
        }
        if self.pool.max_per_origin == 0 {
            return Err(invalid("pool.max_per_origin", "must be > 0"));
        }
        if self.pool.health_check_interval_secs == 0 {
            return Err(invalid("pool.health_check_interval_secs", "must be > 0"));
        }
        if self.pool.connect_timeout_ms == 0 {
            return Err(invalid("pool.connect_timeout_ms", "must be > 0"));
        }
        if self.pool.call_timeout_ms == 0 {
            return Err(invalid("pool.call_timeout_ms", "must be > 0"));
        }
        if self.pool.failure_threshold == 0 {
            return Err(invalid("pool.failure_threshold", "must be > 0"));
        }
        if self.pool.update_channel_capacity == 0 {
            return Err(invalid("pool.update_channel_capacity", "must be > 0"));
        }
        if self.recovery.max_retries == 0 {
            return Err(invalid("recovery.max_retries", "must be > 0"));
        }
        if self.recovery.base_delay_ms > self.recovery.max_delay_ms {
            return Err(invalid("recovery.base_delay_ms", "must be <= max_delay_ms"));
        }
        if self.recovery.scan_interval_ms == 0 {
            return Err(invalid("recovery.scan_interval_ms", "must be > 0"));
        }
        if self.broadcast.batch_width == 0 {
            return Err(invalid("broadcast.batch_width", "must be > 0"));
        }
        if self.cache.l1_capacity == 0 || self.cache.l2_capacity == 0 {
            return Err(invalid("cache.l1_capacity", "tier capacities must be > 0"));
        }
        if self.cache.l1_ttl_secs > self.cache.l2_ttl_secs {
            return Err(invalid("cache.l1_ttl_secs", "must be <= l2_ttl_secs"));
        }
        if !(0.0..=1.0).contains(&self.cache.pressure_evict_ratio) {
            return Err(invalid("cache.pressure_evict_ratio", "must be within 0.0..=1.0"));
        }
        if !(0.0..=1.0).contains(&self.strategy.error_rate_threshold) {
            return Err(invalid("strategy.error_rate_threshold", "must be within 0.0..=1.0"));
        }
        if self.strategy.pressure_multiplier < 1.0 {
            return Err(invalid("strategy.pressure_multiplier", "must be >= 1.0"));
        }
        if self.strategy.adaptive_min_ttl_secs > self.strategy.adaptive_max_ttl_secs {
            return Err(invalid(
                "strategy.adaptive_min_ttl_secs",
                "must be <= adaptive_max_ttl_secs",
            ));
        }

        if self.pressure.max_memory_bytes == 0 || self.pressure.bytes_per_entry == 0 {
            return Err(invalid("pressure.max_memory_bytes", "budget sizes must be > 0"));
        }
        for (field, target) in [
            ("pressure.memory_target", self.pressure.memory_target),
            ("pressure.cpu_target", self.pressure.cpu_target),
        ] {
            if !(target > 0.0 && target <= 1.0) {
                return Err(invalid(field, "must be within (0.0, 1.0]"));
            }
        }
        if self.pressure.sample_interval_ms == 0 {
            return Err(invalid("pressure.sample_interval_ms", "must be > 0"));
        }

        validate_policy("rate_limit.default", &self.rate_limit.default)?;
        validate_policy("rate_limit.admission", &self.rate_limit.admission)?;
        for policy in self.rate_limit.credentials.values() {
            validate_policy("rate_limit.credentials", policy)?;
        }

        Ok(())
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}

fn validate_policy(field: &'static str, policy: &RateLimitPolicy) -> Result<()> {
    if policy.requests == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "requests must be > 0".into(),
        }
        .into());
    }
    parse_window(&policy.window).map_err(|e| ConfigError::InvalidValue {
        field,
        reason: e.to_string(),
    })?;
    Ok(())
}
