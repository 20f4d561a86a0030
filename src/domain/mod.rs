//! Provider-agnostic domain types: identifiers, connection lifecycle,
//! mapping rules, health and market-session signals.

pub mod clock;
pub mod connection;
pub mod health;
pub mod id;
pub mod mapping;
pub mod market;

pub use clock::{Clock, SystemClock};
pub use connection::ConnectionState;
pub use health::{HealthState, HealthStatus};
pub use id::{ClientId, ConnectionId, CredentialId, ProviderId, Symbol};
pub use mapping::{RuleType, SymbolMapping};
pub use market::{CacheStrategy, DataClassification, MarketSession, PressureLevel, ResourcePressure};
