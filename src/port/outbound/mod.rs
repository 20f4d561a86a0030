//! Outbound ports (driven side): interfaces implemented by outbound adapters.
//!
//! These contracts describe infrastructure dependencies such as provider
//! SDKs, the backing key-value store, the durable rule store, monitoring and
//! market-session and host-pressure sources.

pub mod events;
pub mod pressure;
pub mod provider;
pub mod rules;
pub mod session;
pub mod store;
