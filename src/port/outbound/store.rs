//! Backing key-value store port.
//!
//! Used by the durable rule repository and by the rate limiter. Besides plain
//! `get/set/mget/mset/delete` with per-key TTL, the store must execute a small
//! set of multi-step scripts atomically on its side; the rate limiter relies
//! on that to avoid local read-modify-write races.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Multi-step operations the store executes as a single atomic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicScript {
    /// Increment the counter at `key`; if this created the counter, set its
    /// expiry to `ttl`. Returns the post-increment value.
    IncrementWithExpiry { key: String, ttl: Duration },

    /// Sliding-window admission against the ordered timestamp set at `key`:
    /// drop timestamps `<= now_ms - window_ms`, count the rest, and if the
    /// count is below `limit` add `now_ms`.
    SlidingWindowAdmit {
        key: String,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    },
}

/// Result of an [`AtomicScript`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Counter(u64),
    SlidingWindow {
        admitted: bool,
        /// Entries in the window after the script ran.
        count: u64,
        /// Oldest timestamp still inside the window.
        oldest_ms: Option<i64>,
    },
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Fetch several keys in one round trip; the result is positional.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn mset(&self, entries: Vec<(String, String)>, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn eval(&self, script: AtomicScript) -> Result<ScriptOutcome>;
}
