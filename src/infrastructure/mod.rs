//! Infrastructure layer.
//!
//! The gateway's runtime components. Each one is provider-agnostic and
//! talks to the outside world only through ports.
//!
//! # Submodules
//!
//! - [`provider`] - Connection pool, stream feed and recovery worker
//! - [`subscription`] - Client subscription state and reference counts
//! - [`broadcast`] - Fan-out of updates to subscribed clients
//! - [`cache`] - Tiered symbol-mapping cache
//! - [`rate_limit`] - Fixed and sliding window quotas
//! - [`config`] - Configuration loading and validation

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod provider;
pub mod rate_limit;
pub mod subscription;
