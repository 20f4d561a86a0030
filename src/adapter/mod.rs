//! Implementations of ports (hexagonal adapters).
//!
//! - [`inbound`]: transports that drive the gateway
//! - [`outbound`]: store, rule repository, event bus, market session and
//!   provider implementations

pub mod inbound;
pub mod outbound;
