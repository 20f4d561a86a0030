//! Inbound (driving) ports consumed by inbound adapters.
//!
//! - [`gateway`]: push-channel protocol and connection lifecycle hooks

pub mod gateway;
