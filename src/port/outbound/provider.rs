//! Provider SDK port.
//!
//! Every external market-data provider is reached through a [`ProviderClient`].
//! Vendor SDKs are wrapped by adapters that implement this trait; the pool
//! never talks to a vendor library directly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CredentialId, ProviderId};
use crate::error::Result;

/// A single quote as produced by a provider, keyed by the provider's own code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Callback invoked by a provider for every pushed update.
pub type UpdateCallback = Arc<dyn Fn(Quote) + Send + Sync>;

/// A session with one provider under one credential.
///
/// Implementations must be safe to share across tasks; the pool holds them
/// behind `Arc` and calls them concurrently from the request path, the
/// health check and the recovery worker.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Establish the provider session.
    async fn connect(&self) -> Result<()>;

    /// One-shot quote request.
    async fn quote(&self, symbols: &[String]) -> Result<Vec<Quote>>;

    /// Start pushing updates for `symbols` to `on_update`.
    async fn subscribe(&self, symbols: &[String], on_update: UpdateCallback) -> Result<()>;

    /// Stop pushing updates for `symbols`.
    async fn unsubscribe(&self, symbols: &[String]) -> Result<()>;

    /// Cheap liveness check used by the health check.
    async fn ping(&self) -> Result<()>;

    /// Tear the session down. Must be safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Factory for new provider sessions.
///
/// Used by the connection pool to open connections on demand and by the
/// recovery worker to replace broken ones.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderId, &CredentialId) -> Arc<dyn ProviderClient> + Send + Sync>;
