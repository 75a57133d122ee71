//! Lifecycle event names reserved by the transport.

/// Events the transport emits on its own behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Handshake completed, a session exists.
    Connect,
    /// The remote refused the handshake.
    ConnectError,
    /// Generic transport failure.
    Error,
    /// The session ended.
    Disconnect,
}

impl LifecycleEvent {
    /// All lifecycle events.
    pub const ALL: [LifecycleEvent; 4] = [
        LifecycleEvent::Connect,
        LifecycleEvent::ConnectError,
        LifecycleEvent::Error,
        LifecycleEvent::Disconnect,
    ];

    /// The event name as seen by listeners.
    #[must_use]
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Connect => "connect",
            LifecycleEvent::ConnectError => "connect_error",
            LifecycleEvent::Error => "error",
            LifecycleEvent::Disconnect => "disconnect",
        }
    }

    /// Look up a lifecycle event by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }

    /// Check whether `name` is reserved and may not be emitted by clients.
    #[must_use]
    #[inline]
    pub fn is_reserved(name: &str) -> bool {
        Self::from_name(name).is_some()
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
