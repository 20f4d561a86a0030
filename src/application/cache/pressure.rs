//! Host pressure measured against a [`PressureConfig`] budget.
//!
//! Memory use is estimated from the entries held by the mapping cache and
//! the value cache, each priced at `bytes_per_entry`. CPU load is read off
//! the provider update backlog. A signal is elevated at its target and
//! critical once the whole budget is spent.

use std::sync::Arc;

use super::SmartCacheOrchestrator;
use crate::domain::{PressureLevel, ResourcePressure};
use crate::infrastructure::cache::SymbolMapperCache;
use crate::infrastructure::config::PressureConfig;
use crate::infrastructure::provider::ConnectionPoolManager;
use crate::port::PressureSource;

fn level(utilization: f64, target: f64) -> PressureLevel {
    if utilization >= 1.0 {
        PressureLevel::Critical
    } else if utilization >= target {
        PressureLevel::Elevated
    } else {
        PressureLevel::Normal
    }
}

pub struct BudgetPressure {
    config: PressureConfig,
    pool: Arc<ConnectionPoolManager>,
    mapper: SymbolMapperCache,
    orchestrator: Arc<SmartCacheOrchestrator>,
}

impl BudgetPressure {
    pub fn new(
        config: PressureConfig,
        pool: Arc<ConnectionPoolManager>,
        mapper: SymbolMapperCache,
        orchestrator: Arc<SmartCacheOrchestrator>,
    ) -> Self {
        Self {
            config,
            pool,
            mapper,
            orchestrator,
        }
    }

    /// Estimated bytes held by cached entries.
    #[must_use]
    pub fn estimated_memory_bytes(&self) -> u64 {
        let mapper = self.mapper.stats();
        let entries = mapper.l1_entries + mapper.l2_entries + self.orchestrator.stats().cached_values;
        (entries as u64).saturating_mul(self.config.bytes_per_entry)
    }
}

impl PressureSource for BudgetPressure {
    fn pressure(&self) -> ResourcePressure {
        let memory = self.estimated_memory_bytes() as f64 / self.config.max_memory_bytes.max(1) as f64;
        ResourcePressure {
            memory: level(memory, self.config.memory_target),
            cpu: level(self.pool.update_backlog(), self.config.cpu_target),
        }
    }
}
