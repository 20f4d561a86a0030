//! Provider connection management.
//!
//! - [`pool`] - Connection pool with ceilings, health checks and idle reaping
//! - [`feed`] - Canonical-symbol feed over the pool's stream connections
//! - [`recovery`] - Background reconnect-and-replay worker

pub mod feed;
pub mod pool;
pub mod recovery;

pub use feed::ProviderFeed;
pub use pool::{
    ConnectionHandle, ConnectionPoolManager, DegradedConnection, HealthReport, PoolStats,
    ProviderUpdate,
};
pub use recovery::{RecoveryOutcome, RecoveryStats, ScanReport, StreamRecoveryWorker};
