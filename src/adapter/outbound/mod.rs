//! Outbound adapters (driven side).

pub mod events;
pub mod memory;
pub mod rules;
pub mod session;
pub mod simulated;

pub use events::ChannelEventBus;
pub use memory::MemoryStore;
pub use rules::StoreRuleRepository;
pub use session::WeekdaySchedule;
pub use simulated::{simulated_factory, SimulatedProvider};
