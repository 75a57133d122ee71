//! # iounit - Future-based test harness for event-driven realtime clients
//!
//! `iounit` wraps a callback-driven realtime client (named events, variadic
//! arguments, acknowledgement callbacks) in operations that return futures,
//! so integration tests can be written as straight-line `async` code.
//!
//! ## Features
//!
//! - **Handshake race** between `connect`, `connect_error`, `error` and a timer
//! - **Future-returning handles**: `on`, `emit`, `disconnect`, `reconnect`
//! - **Pluggable acknowledgement policy** with a single, typed contract
//! - **Explicit registry** of live connections for one-call teardown
//! - **Loopback transport** with a scriptable in-process server for tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use iounit::{AckHandler, ConnectionFactory, FactoryConfig};
//! use iounit::transport::loopback::LoopbackServer;
//! use serde_json::json;
//!
//! let server = LoopbackServer::new("localhost:8080");
//! let config = FactoryConfig::new("http://localhost:8080")
//!     .with_ack_handler(AckHandler::status());
//! let factory = ConnectionFactory::new(config, server.transport())?;
//!
//! let client = factory.connect().await?;
//! let reply = client.emit("sayHi", vec![]).await?;
//! factory.registry().disconnect_all().await?;
//! ```

pub mod ack;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod registry;
pub mod transport;

mod util;

pub use ack::{AckFuture, AckHandler};
pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TRANSPORTS, FactoryConfig,
    TransportParams,
};
pub use connection::{Acknowledged, ConnectionHandle, ConnectionState, NextEvent};
pub use error::{Error, Result};
pub use factory::ConnectionFactory;
pub use registry::ConnectionRegistry;
pub use transport::{Args, LifecycleEvent, SessionId, Socket, Transport};
