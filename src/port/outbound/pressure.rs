//! Host resource pressure.

use crate::domain::ResourcePressure;

/// Current memory and CPU pressure.
///
/// Sampled on every cache maintenance tick, so implementations must be cheap
/// and must not block.
pub trait PressureSource: Send + Sync {
    fn pressure(&self) -> ResourcePressure;
}
