//! Application services (use cases).
//!
//! - [`gateway`]: push-channel connection handling and update fan-out
//! - [`quote`]: request-path quote snapshots
//! - [`cache`]: strategy selection and value caching for provider reads

pub mod cache;
pub mod gateway;
pub mod quote;

pub use gateway::Gateway;
pub use quote::QuoteService;
