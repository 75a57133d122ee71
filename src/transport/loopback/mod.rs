//! In-process transport for tests.
//!
//! [`LoopbackServer`] plays the remote side: namespaces, request handlers,
//! broadcasts and server-initiated disconnects. [`LoopbackTransport`] opens
//! [`LoopbackSocket`]s towards it. No bytes are serialized; events travel as
//! JSON values over tokio channels.
//!
//! ## Example
//!
//! ```rust,ignore
//! use iounit::transport::loopback::LoopbackServer;
//! use serde_json::json;
//!
//! let server = LoopbackServer::new("localhost:8080");
//! server.namespace("/").on("sayHi", |_peer, _args, ack| {
//!     if let Some(ack) = ack {
//!         ack(vec![json!({"status": true, "message": "hi"})]);
//!     }
//! });
//! let transport = server.transport();
//! ```
//!
//! ## Delivery order
//!
//! Each socket owns one delivery queue, pumped by one task, so listeners see
//! events and acknowledgements in the order the server produced them. Each
//! server peer owns one inbound queue, so handlers see client events in order.

mod server;
mod socket;

pub use server::{EventHandler, LoopbackServer, Namespace, ServerSocket};
pub use socket::LoopbackSocket;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{TransportParams, validate_address};
use crate::error::{Error, Result};
use crate::transport::{Socket, Transport};

/// Reason delivered with `disconnect` when the client closed the session.
pub const CLIENT_DISCONNECT_REASON: &str = "io client disconnect";

/// Reason delivered with `disconnect` when the server closed the session.
pub const SERVER_DISCONNECT_REASON: &str = "io server disconnect";

/// How the server answers the next handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandshakeMode {
    /// Complete the handshake right away.
    #[default]
    Accept,
    /// Complete the handshake after a delay.
    Delay(Duration),
    /// Answer with `connect_error`.
    Refuse(String),
    /// Answer with a generic `error`.
    Fault(String),
    /// Never answer.
    Silent,
}

/// [`Transport`] implementation backed by a [`LoopbackServer`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    server: LoopbackServer,
}

impl LoopbackTransport {
    /// Create a transport that reaches `server`.
    #[must_use]
    pub fn new(server: LoopbackServer) -> Self {
        Self { server }
    }

    /// The server this transport reaches.
    #[must_use]
    pub fn server(&self) -> &LoopbackServer {
        &self.server
    }
}

impl Transport for LoopbackTransport {
    fn open(&self, address: &str, params: &TransportParams) -> Result<Arc<dyn Socket>> {
        let target = Target::parse(address)?;
        let socket = LoopbackSocket::open(self.server.clone(), target, params.clone())?;
        Ok(Arc::new(socket))
    }
}

/// Authority and namespace an address points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub(crate) authority: String,
    pub(crate) namespace: String,
}

impl Target {
    /// Parse `scheme://authority/namespace?query`; the scheme is optional.
    pub(crate) fn parse(address: &str) -> Result<Self> {
        validate_address(address)?;
        let rest = address
            .split_once("://")
            .map_or(address, |(_, rest)| rest);
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));

        if authority.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "address has no authority: {address}"
            )));
        }

        Ok(Self {
            authority: authority.to_string(),
            namespace: normalize_namespace(path),
        })
    }
}

/// Turn `""`, `"/"`, `"chat/"` or `"/chat"` into `"/"` or `"/chat"`.
pub(crate) fn normalize_namespace(name: &str) -> String {
    let trimmed = name.trim_matches('/');
    format!("/{trimmed}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        let target = Target::parse("http://localhost:8080").unwrap();
        assert_eq!(target.authority, "localhost:8080");
        assert_eq!(target.namespace, "/");
    }

    #[test]
    fn test_parse_namespace() {
        let target = Target::parse("ws://localhost:8080/clientNamespace/").unwrap();
        assert_eq!(target.authority, "localhost:8080");
        assert_eq!(target.namespace, "/clientNamespace");
    }

    #[test]
    fn test_parse_strips_query() {
        let target = Target::parse("http://host/chat?token=abc").unwrap();
        assert_eq!(target.namespace, "/chat");
    }

    #[test]
    fn test_parse_without_scheme() {
        let target = Target::parse("fixture/admin").unwrap();
        assert_eq!(target.authority, "fixture");
        assert_eq!(target.namespace, "/admin");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(Target::parse("").is_err());
        assert!(Target::parse("http:///chat").is_err());
    }

    #[test]
    fn test_normalize_namespace() {
        assert_eq!(normalize_namespace(""), "/");
        assert_eq!(normalize_namespace("/"), "/");
        assert_eq!(normalize_namespace("chat"), "/chat");
        assert_eq!(normalize_namespace("/chat/"), "/chat");
    }

    #[test]
    fn test_default_mode() {
        assert_eq!(HandshakeMode::default(), HandshakeMode::Accept);
    }
}
