//! Failure classification for provider and delivery failures.
//!
//! Reason patterns are checked before the health state: a provider with no
//! server instance is critical even when its last health report was fine.

use serde::Serialize;

use crate::domain::{HealthState, HealthStatus};
use crate::error::Error;

const NO_SERVER_INSTANCE: &str = "no server instance";
const NOT_INTEGRATED: &str = "not integrated";

const REC_NO_SERVER: &str =
    "Provider has no server instance available: verify the provider deployment and credentials, then re-enable the provider.";
const REC_NOT_INTEGRATED: &str =
    "Provider is not integrated for this data type: route the affected symbols to an integrated provider.";
const REC_UNHEALTHY: &str =
    "Provider is unhealthy: fail over to a backup provider and page the on-call operator.";
const REC_DEGRADED: &str =
    "Provider is degraded: watch its error rate and prepare a failover if it keeps rising.";
const REC_DEFAULT: &str =
    "Transient delivery failure: no action needed unless it keeps recurring.";

fn has_no_server_instance(reason: &str) -> bool {
    reason.to_lowercase().contains(NO_SERVER_INSTANCE)
}

fn is_not_integrated(reason: &str) -> bool {
    reason.contains(NOT_INTEGRATED)
}

/// Whether a failure needs operator intervention.
#[must_use]
pub fn is_critical(health: &HealthStatus, reason: &str) -> bool {
    has_no_server_instance(reason)
        || is_not_integrated(reason)
        || health.status == HealthState::Unhealthy
}

/// Non-critical but worth an operator's look.
#[must_use]
pub fn needs_attention(health: &HealthStatus, reason: &str) -> bool {
    !is_critical(health, reason) && health.status == HealthState::Degraded
}

/// Remediation text for a failure. Never empty.
#[must_use]
pub fn recommendation(reason: &str, health: &HealthStatus) -> &'static str {
    if has_no_server_instance(reason) {
        REC_NO_SERVER
    } else if is_not_integrated(reason) {
        REC_NOT_INTEGRATED
    } else {
        match health.status {
            HealthState::Unhealthy => REC_UNHEALTHY,
            HealthState::Degraded => REC_DEGRADED,
            HealthState::Healthy => REC_DEFAULT,
        }
    }
}

/// Classification of a single failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureAssessment {
    pub target: String,
    pub reason: String,
    pub critical: bool,
    pub needs_attention: bool,
    pub recommendation: &'static str,
}

impl FailureAssessment {
    pub fn assess(target: impl Into<String>, reason: impl Into<String>, health: &HealthStatus) -> Self {
        let reason = reason.into();
        Self {
            target: target.into(),
            critical: is_critical(health, &reason),
            needs_attention: needs_attention(health, &reason),
            recommendation: recommendation(&reason, health),
            reason,
        }
    }

    /// The error to surface for a critical failure; `None` otherwise.
    #[must_use]
    pub fn into_error(self) -> Option<Error> {
        self.critical.then(|| Error::CriticalBroadcast {
            target: self.target,
            reason: self.reason,
            recommendation: self.recommendation,
        })
    }
}
