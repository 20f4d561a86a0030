//! Request-path caching policy.

mod orchestrator;
mod pressure;

pub use orchestrator::{CacheStrategyDecision, OrchestratorStats, SmartCacheOrchestrator};
pub use pressure::BudgetPressure;
