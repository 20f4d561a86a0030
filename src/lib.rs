//! quotegate - real-time market-data gateway.
//!
//! Sits between push-channel clients and external market-data providers:
//! pools provider connections per credential, reference-counts client
//! subscriptions so each symbol is subscribed upstream once, fans updates
//! out to clients and recovers broken streams with bounded backoff.
//!
//! # Architecture
//!
//! - [`domain`] - Identifiers, connection lifecycle, mapping rules, health
//! - [`port`] - Traits for providers, stores, events and transports
//! - [`infrastructure`] - Pool, subscriptions, broadcaster, recovery,
//!   symbol mapping cache, rate limiter and configuration
//! - [`application`] - Gateway connection handler, cache orchestrator and
//!   quote snapshots
//! - [`adapter`] - In-memory store, rule repository, event bus, market
//!   session, simulated provider and the WebSocket transport
//! - [`app`] - Composition root used by the binary
//!
//! # Features
//!
//! - `testkit` - Scripted providers, manual clock and recording sinks for
//!   integration tests

pub mod adapter;
pub mod app;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::{Error, Result};
