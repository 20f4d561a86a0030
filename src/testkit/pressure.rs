//! Settable host pressure.

use parking_lot::Mutex;

use crate::domain::ResourcePressure;
use crate::port::PressureSource;

#[derive(Default)]
pub struct FixedPressure {
    pressure: Mutex<ResourcePressure>,
}

impl FixedPressure {
    pub fn normal() -> Self {
        Self::default()
    }

    pub fn set(&self, pressure: ResourcePressure) {
        *self.pressure.lock() = pressure;
    }
}

impl PressureSource for FixedPressure {
    fn pressure(&self) -> ResourcePressure {
        *self.pressure.lock()
    }
}
