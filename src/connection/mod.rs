//! Connection handles and their lifecycle.
//!
//! A [`ConnectionHandle`] wraps one transport socket and exposes its
//! callback API as futures: [`on`](ConnectionHandle::on) waits for the next
//! event, [`emit`](ConnectionHandle::emit) waits for the acknowledgement and
//! [`disconnect`](ConnectionHandle::disconnect) waits for the socket to close.
//!
//! ## Connection Lifecycle
//!
//! 1. **Connected** - handshake won, handle registered
//! 2. **Disconnected** - `disconnect` observed, handle deregistered
//! 3. **Reconnecting** - explicit [`reconnect`](ConnectionHandle::reconnect) in flight
//! 4. **Failed** - the last reconnect lost its handshake
//!
//! ## Example
//!
//! ```rust,ignore
//! use serde_json::json;
//!
//! let handle = factory.connect().await?;
//! let pong = handle.on("xpong");
//! let reply = handle.emit("xping", vec![]).await?;
//! let args = pong.await?;
//! handle.disconnect().await?;
//! ```

mod handle;
pub(crate) mod handshake;
mod state;

pub use handle::{Acknowledged, ConnectionHandle, NextEvent};
pub use state::ConnectionState;
