//! Per-credential request quotas.
//!
//! Two interchangeable algorithms, both executed as a single atomic script on
//! the backing store so concurrent callers sharing a key never double-count:
//!
//! - **Fixed window**: one counter per `(key, window_start)`, created with an
//!   expiry equal to the window length.
//! - **Sliding window**: an ordered timestamp set trimmed to the rolling
//!   window on every check.
//!
//! Both fail open: when the store is unreachable the request is allowed and a
//! warning with `fail_open = true` is logged. A policy may opt into failing
//! closed instead.

mod window;

pub use window::parse_window;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::domain::{Clock, CredentialId};
use crate::error::{Error, Result};
use crate::infrastructure::config::{RateLimitAlgorithm, RateLimitConfig, RateLimitPolicy};
use crate::port::{
    AdmissionControl, AtomicScript, DomainEvent, EventBus, EventKind, KeyValueStore,
    ScriptOutcome,
};

const COMPONENT: &str = "rate_limiter";

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests counted in the current window, including this one if allowed.
    pub current: u64,
    pub limit: u64,
    /// Time until a denied request would be admitted.
    pub retry_after: Option<Duration>,
    /// The store failed and the decision came from the failure policy.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Convert a denial into [`Error::RateLimited`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] when the request was not allowed.
    pub fn into_result(self, key: &str) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(Error::RateLimited {
                key: key.to_string(),
                current: self.current,
                limit: self.limit,
            })
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventBus>,
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            events,
        }
    }

    /// Check `key` against its configured policy (override or default).
    ///
    /// # Errors
    ///
    /// Returns a validation error if the policy's window is malformed.
    pub async fn check(&self, key: &str) -> Result<RateLimitDecision> {
        let policy = self.config.policy_for(key).clone();
        self.check_policy(key, &policy).await
    }

    /// Check `key` against an explicit policy.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `policy.window` is malformed.
    pub async fn check_policy(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision> {
        let window_secs = parse_window(&policy.window)?;

        if !self.config.enabled {
            return Ok(RateLimitDecision {
                allowed: true,
                current: 0,
                limit: policy.requests,
                retry_after: None,
                degraded: false,
            });
        }

        let decision = match policy.algorithm {
            RateLimitAlgorithm::FixedWindow => {
                self.fixed_window(key, policy.requests, window_secs, policy.fail_closed)
                    .await
            }
            RateLimitAlgorithm::SlidingWindow => {
                self.sliding_window(key, policy.requests, window_secs, policy.fail_closed)
                    .await
            }
        };

        if !decision.allowed && !decision.degraded {
            debug!(key, current = decision.current, limit = decision.limit, "Rate limit exceeded");
            self.events.emit(DomainEvent::new(
                EventKind::RateLimitExceeded,
                COMPONENT,
                "check",
                json!({
                    "key": key,
                    "current": decision.current,
                    "limit": decision.limit,
                    "retry_after_ms": decision.retry_after.map(|d| d.as_millis() as u64),
                }),
            ));
        }

        Ok(decision)
    }

    /// Fixed-window check: atomically increment `(key, window_start)`.
    pub async fn fixed_window(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        fail_closed: bool,
    ) -> RateLimitDecision {
        let now = self.clock.now().timestamp();
        let window = window_secs as i64;
        let window_start = now - now.rem_euclid(window);
        let counter_key = format!("ratelimit:fixed:{key}:{window_start}");

        let script = AtomicScript::IncrementWithExpiry {
            key: counter_key,
            ttl: Duration::from_secs(window_secs),
        };

        match self.store.eval(script).await {
            Ok(ScriptOutcome::Counter(current)) => {
                let allowed = current <= limit;
                let retry_after = (!allowed)
                    .then(|| Duration::from_secs((window_start + window - now).max(0) as u64));
                RateLimitDecision {
                    allowed,
                    current,
                    limit,
                    retry_after,
                    degraded: false,
                }
            }
            Ok(other) => self.store_failure(
                key,
                limit,
                &format!("unexpected script outcome {other:?}"),
                fail_closed,
            ),
            Err(e) => self.store_failure(key, limit, &e.to_string(), fail_closed),
        }
    }

    /// Sliding-window check: atomically trim, count and conditionally add `now`.
    pub async fn sliding_window(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        fail_closed: bool,
    ) -> RateLimitDecision {
        let now_ms = self.clock.now_millis();
        let window_ms = (window_secs as i64).saturating_mul(1_000);

        let script = AtomicScript::SlidingWindowAdmit {
            key: format!("ratelimit:sliding:{key}"),
            now_ms,
            window_ms,
            limit,
        };

        match self.store.eval(script).await {
            Ok(ScriptOutcome::SlidingWindow {
                admitted,
                count,
                oldest_ms,
            }) => {
                let retry_after = if admitted {
                    None
                } else {
                    oldest_ms.map(|oldest| {
                        Duration::from_millis((oldest + window_ms - now_ms).max(0) as u64)
                    })
                };
                RateLimitDecision {
                    allowed: admitted,
                    current: count,
                    limit,
                    retry_after,
                    degraded: false,
                }
            }
            Ok(other) => self.store_failure(
                key,
                limit,
                &format!("unexpected script outcome {other:?}"),
                fail_closed,
            ),
            Err(e) => self.store_failure(key, limit, &e.to_string(), fail_closed),
        }
    }

    fn store_failure(
        &self,
        key: &str,
        limit: u64,
        reason: &str,
        fail_closed: bool,
    ) -> RateLimitDecision {
        error!(key, error = reason, "Rate limit store call failed");
        if fail_closed {
            warn!(key, fail_open = false, "Rate limiter failing closed, request denied");
        } else {
            warn!(key, fail_open = true, "Rate limiter failing open, request allowed");
        }

        self.events.emit(DomainEvent::new(
            EventKind::OperationFailed,
            COMPONENT,
            "check",
            json!({ "key": key, "reason": reason, "fail_open": !fail_closed }),
        ));

        RateLimitDecision {
            allowed: !fail_closed,
            current: 0,
            limit,
            retry_after: None,
            degraded: true,
        }
    }
}

#[async_trait]
impl AdmissionControl for RateLimiter {
    async fn admit(&self, credential: &CredentialId) -> bool {
        let policy = self.config.admission.clone();
        let key = format!("admission:{credential}");
        match self.check_policy(&key, &policy).await {
            Ok(decision) => decision.allowed,
            Err(e) => {
                warn!(credential = %credential, error = %e, "Invalid admission policy, admitting");
                true
            }
        }
    }
}
