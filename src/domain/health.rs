//! Provider health reporting.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health snapshot attached to failure reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthStatus {
    pub const fn new(status: HealthState) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    pub const fn healthy() -> Self {
        Self::new(HealthState::Healthy)
    }

    pub const fn degraded() -> Self {
        Self::new(HealthState::Degraded)
    }

    pub const fn unhealthy() -> Self {
        Self::new(HealthState::Unhealthy)
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
