//! Transport collaborator contract.
//!
//! The crate never speaks a wire protocol itself. It drives any client that
//! implements [`Transport`] and [`Socket`]: named events with variadic
//! arguments, acknowledgement callbacks and the lifecycle events listed in
//! [`LifecycleEvent`].
//!
//! ## Contract
//!
//! - [`Transport::open`] creates a socket without starting the handshake.
//! - [`Socket::connect`] starts (or restarts) the handshake; the outcome is
//!   reported as `connect`, `connect_error` or `error`.
//! - Listeners for one event fire in registration order, and events on one
//!   socket are delivered in the order the transport received them.

mod event;
mod session;

#[cfg(feature = "loopback")]
pub mod loopback;

pub use event::LifecycleEvent;
pub use session::SessionId;

use std::sync::Arc;

use serde_json::Value;

use crate::config::TransportParams;
use crate::error::Result;

/// Ordered variadic argument list of an event or acknowledgement.
pub type Args = Vec<Value>;

/// Acknowledgement callback attached to an emitted event.
pub type Ack = Box<dyn FnOnce(Args) + Send>;

/// Listener that stays armed until removed.
pub type Listener = Arc<dyn Fn(Args) + Send + Sync>;

/// Listener that is removed after its first invocation.
pub type OnceListener = Box<dyn FnOnce(Args) + Send>;

/// Identifies one registered listener on a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw listener number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw listener number.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// Opens sockets towards an address.
pub trait Transport: Send + Sync + 'static {
    /// Create a socket for `address` using the merged transport `params`.
    ///
    /// No handshake is started; call [`Socket::connect`] once the lifecycle
    /// listeners are armed.
    ///
    /// # Errors
    ///
    /// Implementations return an error when the socket cannot be created at all.
    fn open(&self, address: &str, params: &TransportParams) -> Result<Arc<dyn Socket>>;
}

/// One callback-driven client connection.
pub trait Socket: Send + Sync + 'static {
    /// Session identity, present while connected.
    fn id(&self) -> Option<SessionId>;

    /// Whether a session is currently established.
    fn is_connected(&self) -> bool;

    /// Start the handshake. A socket that is connected or connecting ignores this.
    fn connect(&self);

    /// Register a persistent listener for `event`.
    fn on(&self, event: &str, listener: Listener) -> ListenerId;

    /// Register a listener that fires at most once for `event`.
    fn once(&self, event: &str, listener: OnceListener) -> ListenerId;

    /// Remove a listener. Returns `false` if it already fired or was removed.
    fn off(&self, id: ListenerId) -> bool;

    /// Send `event` with `args`, optionally asking the remote to acknowledge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`](crate::Error::NotConnected) without a
    /// live session and [`Error::Transport`](crate::Error::Transport) for
    /// lifecycle event names.
    fn emit(&self, event: &str, args: Args, ack: Option<Ack>) -> Result<()>;

    /// Close the session. The transport reports `disconnect` when done.
    fn disconnect(&self);
}

/// Extract a human-readable message from lifecycle event arguments.
///
/// Strings are used as-is, objects contribute their `message` field and
/// anything else is rendered as JSON.
pub fn describe(args: &[Value]) -> String {
    match args.first() {
        None => "unknown error".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => Value::Object(map.clone()).to_string(),
        },
        Some(other) => other.to_string(),
    }
}
