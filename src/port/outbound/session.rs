//! Market-session and admission-control collaborators.

use async_trait::async_trait;

use crate::domain::{CredentialId, MarketSession};

/// Tells whether the market is currently open.
pub trait MarketSessionSource: Send + Sync {
    fn current_session(&self) -> MarketSession;
}

/// External admission gate consulted before the pool opens a connection.
///
/// Only the pass/fail contract is consumed here; the decision logic lives in
/// the implementation (typically the rate limiter).
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    async fn admit(&self, credential: &CredentialId) -> bool;
}
