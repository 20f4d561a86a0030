//! Infrastructure configuration modules.

pub mod cache;
pub mod logging;
pub mod pool;
pub mod pressure;
pub mod rate_limit;
pub mod server;
pub mod settings;

pub use cache::{CacheConfig, StrategyConfig};
pub use logging::LoggingConfig;
pub use pool::{PoolConfig, RecoveryConfig};
pub use pressure::PressureConfig;
pub use rate_limit::{RateLimitAlgorithm, RateLimitConfig, RateLimitPolicy};
pub use server::{BroadcastConfig, ServerConfig, UpstreamConfig};
pub use settings::Config;
