//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! Ports define the extension points of the gateway. They are traits that
//! adapters implement to integrate with external systems.
//!
//! ```text
//!                     ┌──────────────────────────┐
//!   push clients ───▶ │  inbound::gateway        │
//!                     │  (ConnectionHandler)     │
//!                     ├──────────────────────────┤
//!                     │  pool / cache / limiter  │
//!                     ├──────────────────────────┤
//!                     │  outbound::provider      │ ───▶ provider SDKs
//!                     │  outbound::store/rules   │ ───▶ key-value store
//!                     │  outbound::events        │ ───▶ monitoring
//!                     └──────────────────────────┘
//! ```

pub mod inbound;
pub mod outbound;

pub use inbound::gateway::{Action, ClientMessage, ClientSink, ConnectionHandler, PushMessage};
pub use outbound::events::{DomainEvent, EventBus, EventHandler, EventKind, NullEventBus};
pub use outbound::pressure::PressureSource;
pub use outbound::provider::{ProviderClient, ProviderFactory, Quote, UpdateCallback};
pub use outbound::rules::RuleRepository;
pub use outbound::session::{AdmissionControl, MarketSessionSource};
pub use outbound::store::{AtomicScript, KeyValueStore, ScriptOutcome};
