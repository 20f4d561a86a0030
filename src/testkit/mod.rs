//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`clock`]: `ManualClock`, a settable [`Clock`](crate::domain::Clock).
//! - [`provider`]: `ScriptedProvider` and the shared `ProviderScript`.
//! - [`feed`]: `RecordingFeed`, a scriptable [`SymbolFeed`](crate::infrastructure::subscription::SymbolFeed).
//! - [`store`]: `FailingStore` and `ScriptedRuleRepository`.
//! - [`sink`]: `RecordingSink` for push-channel assertions.
//! - [`session`]: `FixedSession`, a settable market session.
//! - [`pressure`]: `FixedPressure`, a settable host pressure.
//! - [`events`]: `RecordingEventBus`.
//! - [`config`]: Canonical test configurations (pool, recovery, cache).

pub mod clock;
pub mod config;
pub mod events;
pub mod feed;
pub mod pressure;
pub mod provider;
pub mod session;
pub mod sink;
pub mod store;
