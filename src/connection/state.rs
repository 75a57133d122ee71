//! Connection handle state machine.
//!
//! ```text
//! Connected --disconnect--> Disconnected --reconnect--> Reconnecting
//!     ^                                                    |     |
//!     +--------------------------connect-------------------+     +--> Failed
//! ```
//!
//! `Failed` can be left again with another `reconnect`.

/// Lifecycle state of a [`ConnectionHandle`](crate::ConnectionHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Session established and registered.
    #[default]
    Connected,
    /// An explicit reconnect is racing its handshake.
    Reconnecting,
    /// The session was closed by either side.
    Disconnected,
    /// The last reconnect attempt failed.
    Failed,
}

impl ConnectionState {
    /// Check if the handle holds a live session.
    #[must_use]
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if emitting is allowed in this state.
    ///
    /// Returns `true` only for `Connected`.
    #[must_use]
    #[inline]
    pub const fn can_emit(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if `reconnect` may start from this state.
    ///
    /// Returns `true` for `Disconnected` or `Failed`.
    #[must_use]
    #[inline]
    pub const fn can_reconnect(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}
