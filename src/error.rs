//! Error types for connection, acknowledgement and registry operations.
//!
//! Every fallible operation of the crate surfaces one of these variants to its
//! immediate caller. Nothing is retried internally.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Result type alias for iounit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while connecting, emitting or disconnecting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Factory configuration failed validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The connect handshake did not finish in time.
    #[error("Could not establish a connection after {}ms", timeout.as_millis())]
    ConnectTimeout {
        /// The configured connect timeout.
        timeout: Duration,
    },

    /// The remote refused the connection (`connect_error`).
    #[error("Connect error: {0}")]
    ConnectError(String),

    /// The transport reported a generic failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The socket has no live session.
    #[error("Socket is not connected")]
    NotConnected,

    /// The transport dropped a pending listener or acknowledgement.
    #[error("Connection closed before the event was delivered")]
    ConnectionClosed,

    /// The acknowledgement handler violated its output contract.
    #[error("Malformed acknowledgement handler: {0}")]
    MalformedHandler(String),

    /// The acknowledgement policy rejected the reply.
    #[error("Acknowledgement rejected: {0}")]
    Rejected(Value),

    /// A spawned connect task did not run to completion.
    #[error("Connect task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}
