//! Fixture server for the integration tests.
//!
//! Runs a [`LoopbackServer`] with the request handlers the suites exercise:
//!
//! | event | arguments | reply |
//! |-------|-----------|-------|
//! | `sayHi` | | `{status: true, message: "hi"}` |
//! | `createFile` | file name, contents | `{status: true, path}` |
//! | `shouldFail` | | `{status: false}` |
//! | `xping` | | emits `xpong("ping ok")`, then `{status: true}` |
//! | `broadcastToAll` | | broadcasts `broadcastToAll("broadcasted!")`, then `{status: true}` |
//! | `countTo` | n | emits `count(1..=n)`, then `{status: true, count: n}` |
//!
//! The secondary namespace `/clientNamespace` accepts sessions without handlers.

use std::path::{Path, PathBuf};

use iounit::transport::loopback::{LoopbackServer, LoopbackTransport, Namespace, ServerSocket};
use iounit::transport::{Ack, Args};
use iounit::{AckHandler, ConnectionFactory, FactoryConfig};
use serde_json::{Value, json};
use tempfile::TempDir;

pub const AUTHORITY: &str = "localhost:8080";

pub struct TestServer {
    server: LoopbackServer,
    dir: TempDir,
}

impl TestServer {
    /// Start the fixture with every handler installed.
    pub fn spawn() -> Self {
        super::init_tracing();

        let server = LoopbackServer::new(AUTHORITY);
        let dir = tempfile::tempdir().expect("failed to create fixture directory");
        install(&server.namespace("/"), dir.path().to_path_buf());

        server.namespace("/clientNamespace").on_connection(|peer| {
            tracing::debug!(session_id = %peer.id(), "connected to /clientNamespace");
        });

        Self { server, dir }
    }

    pub fn url(&self) -> String {
        format!("http://{AUTHORITY}")
    }

    pub fn namespace_url(&self, namespace: &str) -> String {
        format!("http://{AUTHORITY}/{}", namespace.trim_start_matches('/'))
    }

    pub fn server(&self) -> &LoopbackServer {
        &self.server
    }

    pub fn transport(&self) -> LoopbackTransport {
        self.server.transport()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration for the root namespace with the status policy.
    pub fn config(&self) -> FactoryConfig {
        FactoryConfig::new(self.url()).with_ack_handler(AckHandler::status())
    }

    pub fn factory(&self) -> ConnectionFactory {
        ConnectionFactory::new(self.config(), self.transport()).expect("fixture config is valid")
    }

    pub fn factory_with(&self, config: FactoryConfig) -> ConnectionFactory {
        ConnectionFactory::new(config, self.transport()).expect("fixture config is valid")
    }
}

fn reply(ack: Option<Ack>, value: Value) {
    if let Some(ack) = ack {
        ack(vec![value]);
    }
}

fn install(root: &Namespace, dir: PathBuf) {
    root.on("sayHi", |_peer, _args, ack| {
        reply(ack, json!({"status": true, "message": "hi"}));
    });

    root.on("createFile", move |_peer, args: Args, ack| {
        let name = args.first().and_then(Value::as_str).unwrap_or("unnamed");
        let contents = match args.get(1) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let path = dir.join(name);
        match std::fs::write(&path, contents) {
            Ok(()) => reply(ack, json!({"status": true, "path": path.display().to_string()})),
            Err(err) => reply(ack, json!({"status": false, "message": err.to_string()})),
        }
    });

    root.on("shouldFail", |_peer, _args, ack| {
        reply(ack, json!({"status": false}));
    });

    root.on("xping", |peer: &ServerSocket, _args, ack| {
        peer.emit("xpong", vec![json!("ping ok")]);
        reply(ack, json!({"status": true}));
    });

    root.on("broadcastToAll", |peer: &ServerSocket, _args, ack| {
        if let Some(namespace) = peer.namespace() {
            namespace.emit("broadcastToAll", vec![json!("broadcasted!")]);
        }
        reply(ack, json!({"status": true}));
    });

    root.on("countTo", |peer: &ServerSocket, args: Args, ack| {
        let n = args.first().and_then(Value::as_u64).unwrap_or(0);
        for i in 1..=n {
            peer.emit("count", vec![json!(i)]);
        }
        reply(ack, json!({"status": true, "count": n}));
    });
}
