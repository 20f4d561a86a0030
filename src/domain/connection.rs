//! Provider connection lifecycle.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of a pooled provider connection.
///
/// ```text
/// CONNECTING -> CONNECTED -> DEGRADED -> RECONNECTING -> CONNECTED
///                                                     \-> CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Degraded,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    /// Only healthy, established connections are handed out by `acquire`.
    #[must_use]
    pub const fn is_acquirable(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// States that still occupy a slot against the pool ceilings.
    #[must_use]
    pub const fn occupies_slot(self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Closed)
                | (Self::Connected, Self::Degraded)
                | (Self::Connected, Self::Closed)
                | (Self::Degraded, Self::Reconnecting)
                | (Self::Degraded, Self::Closed)
                | (Self::Reconnecting, Self::Connected)
                | (Self::Reconnecting, Self::Degraded)
                | (Self::Reconnecting, Self::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Degraded => "DEGRADED",
            Self::Reconnecting => "RECONNECTING",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}
