//! Push-channel server, broadcast and upstream provider settings.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Grace period for background tasks on shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_bind() -> String {
    "127.0.0.1:9300".into()
}

const fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl ServerConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Fan-out settings for the gateway broadcaster.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Maximum client sends in flight per broadcast.
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,
    /// A send slower than this is recorded as failed.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_batch_width() -> usize {
    num_cpus::get().max(1) * 8
}

const fn default_send_timeout_ms() -> u64 {
    250
}

impl BroadcastConfig {
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_width: default_batch_width(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

/// Upstream provider the gateway streams from.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_credential")]
    pub credential: String,
    /// Tick interval of the simulated provider (milliseconds).
    #[serde(default = "default_simulated_tick_ms")]
    pub simulated_tick_ms: u64,
    /// Local market hours (`HH:MM`) used for the market-session source.
    #[serde(default = "default_market_open")]
    pub market_open: String,
    #[serde(default = "default_market_close")]
    pub market_close: String,
    /// Offset of the market's local time from UTC, in hours.
    #[serde(default)]
    pub utc_offset_hours: i32,
}

fn default_provider() -> String {
    "simulated".into()
}

fn default_credential() -> String {
    "default".into()
}

const fn default_simulated_tick_ms() -> u64 {
    500
}

fn default_market_open() -> String {
    "09:30".into()
}

fn default_market_close() -> String {
    "16:00".into()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            credential: default_credential(),
            simulated_tick_ms: default_simulated_tick_ms(),
            market_open: default_market_open(),
            market_close: default_market_close(),
            utc_offset_hours: 0,
        }
    }
}
