//! Connection pool internal state types.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::{ConnectionId, ConnectionState, CredentialId, ProviderId};
use crate::port::ProviderClient;

/// Shared counters updated atomically by callers and the health task.
#[derive(Default)]
pub(super) struct SharedCounters {
    pub(super) acquisitions: AtomicU64,
    pub(super) rejections: AtomicU64,
    pub(super) health_failures: AtomicU64,
    pub(super) reaped: AtomicU64,
    pub(super) reconnects: AtomicU64,
    pub(super) updates_dropped: AtomicU64,
}

/// One provider session owned by the pool.
pub(super) struct PooledConnection {
    pub(super) id: ConnectionId,
    pub(super) provider: ProviderId,
    pub(super) credential: CredentialId,
    pub(super) origin: Option<String>,
    pub(super) client: Arc<dyn ProviderClient>,
    pub(super) state: ConnectionState,
    pub(super) consecutive_failures: u32,
    pub(super) last_health_check_at: Option<DateTime<Utc>>,
    /// Checked out by a caller; the stream connection is always in use.
    pub(super) in_use: bool,
    pub(super) idle_since: Option<Instant>,
    /// The long-lived push connection for its (provider, credential).
    pub(super) stream: bool,
    /// Provider codes currently subscribed on this session.
    pub(super) subscribed: HashSet<String>,
}

impl PooledConnection {
    pub(super) fn matches(&self, provider: &ProviderId, credential: &CredentialId) -> bool {
        &self.provider == provider && &self.credential == credential
    }

    pub(super) fn is_idle(&self) -> bool {
        !self.in_use && !self.stream && self.state.is_acquirable()
    }

    /// Move to `next` if the lifecycle allows it.
    pub(super) fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Which ceiling refused a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Ceiling {
    Global,
    PerKey,
    PerOrigin,
}

impl Ceiling {
    pub(super) const fn scope(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::PerKey => "per-credential",
            Self::PerOrigin => "per-origin",
        }
    }
}

#[derive(Default)]
pub(super) struct PoolState {
    pub(super) connections: HashMap<ConnectionId, PooledConnection>,
    /// Providers marked unavailable after recovery gave up, until the instant.
    pub(super) unavailable: HashMap<ProviderId, Instant>,
}

impl PoolState {
    fn occupied(&self) -> impl Iterator<Item = &PooledConnection> {
        self.connections.values().filter(|c| c.state.occupies_slot())
    }

    /// First ceiling a new connection for this key and origin would break.
    pub(super) fn exceeded_ceiling(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
        origin: Option<&str>,
        limits: (usize, usize, usize),
    ) -> Option<Ceiling> {
        let (max_global, max_per_key, max_per_origin) = limits;
        if self.occupied().filter(|c| c.matches(provider, credential)).count() >= max_per_key {
            return Some(Ceiling::PerKey);
        }
        if let Some(origin) = origin {
            let from_origin = self
                .occupied()
                .filter(|c| c.origin.as_deref() == Some(origin))
                .count();
            if from_origin >= max_per_origin {
                return Some(Ceiling::PerOrigin);
            }
        }
        if self.occupied().count() >= max_global {
            return Some(Ceiling::Global);
        }
        None
    }

    /// The longest-idle connection that, once closed, frees a slot under
    /// `ceiling` for this key and origin.
    pub(super) fn reclaimable(
        &self,
        ceiling: Ceiling,
        provider: &ProviderId,
        credential: &CredentialId,
        origin: Option<&str>,
    ) -> Option<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.is_idle())
            .filter(|c| match ceiling {
                Ceiling::Global => true,
                Ceiling::PerKey => c.matches(provider, credential),
                Ceiling::PerOrigin => origin.is_some() && c.origin.as_deref() == origin,
            })
            .min_by_key(|c| c.idle_since)
            .map(|c| c.id)
    }

    pub(super) fn idle_for_key(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
    ) -> Option<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.is_idle() && c.matches(provider, credential))
            .max_by_key(|c| c.idle_since)
            .map(|c| c.id)
    }

    pub(super) fn stream_for(
        &self,
        provider: &ProviderId,
        credential: &CredentialId,
    ) -> Option<&PooledConnection> {
        self.connections
            .values()
            .find(|c| c.stream && c.matches(provider, credential))
    }
}
