//! Symbol mapping cache and its building-block tiers.

mod mapper;
mod tier;

pub use mapper::{CacheStats, Lookup, SymbolMapperCache};
pub use tier::{CacheEntry, LruTier, SnapshotTier, Tier};
