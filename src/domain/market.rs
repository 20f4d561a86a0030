//! Inputs to cache-strategy selection: what kind of data, is the market
//! open, and how loaded the host is.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Volatility class of the data being cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    /// Live quotes; stale values are visible to users within seconds.
    RealtimeQuote,
    /// Intraday bars and aggregates that only move while the market trades.
    Intraday,
    /// Reference data such as symbol mappings and instrument metadata.
    Reference,
    /// Fundamentals and other slowly changing data with irregular updates.
    Fundamental,
    /// Per-account or otherwise sensitive data that must never be served stale.
    Sensitive,
}

/// Whether the relevant market is trading right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSession {
    Open,
    Closed,
}

impl MarketSession {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Coarse resource-pressure signal (memory or CPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    #[default]
    Normal,
    Elevated,
    Critical,
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Caching policy selected per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStrategy {
    /// Short TTL measured in seconds.
    StrongTimeliness,
    /// Long TTL measured in minutes.
    WeakTimeliness,
    /// TTL depends on whether the market session is open.
    MarketAware,
    /// Never cache; always read through.
    NoCache,
    /// TTL follows observed hit and error rates.
    Adaptive,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StrongTimeliness => "STRONG_TIMELINESS",
            Self::WeakTimeliness => "WEAK_TIMELINESS",
            Self::MarketAware => "MARKET_AWARE",
            Self::NoCache => "NO_CACHE",
            Self::Adaptive => "ADAPTIVE",
        };
        f.write_str(s)
    }
}

/// Memory and CPU pressure observed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourcePressure {
    pub memory: PressureLevel,
    pub cpu: PressureLevel,
}

impl ResourcePressure {
    /// The worse of the two signals.
    #[must_use]
    pub fn worst(self) -> PressureLevel {
        self.memory.max(self.cpu)
    }
}
