//! Client side of the loopback transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::server::{Inbound, LoopbackServer, ServerSocket};
use super::{CLIENT_DISCONNECT_REASON, HandshakeMode, Target};
use crate::config::TransportParams;
use crate::error::{Error, Result};
use crate::transport::{
    Ack, Args, LifecycleEvent, Listener, ListenerId, OnceListener, SessionId, Socket,
};
use crate::util::lock;

/// Transports the loopback server can serve.
const SUPPORTED_TRANSPORTS: [&str; 2] = ["websocket", "polling"];

/// Something the socket's pump hands to listeners.
pub(crate) enum Delivery {
    /// A server event.
    Event { event: String, args: Args },
    /// An acknowledgement reply for an earlier emit.
    Ack { ack: Ack, args: Args },
    /// The server closed session `id`.
    Closed { id: SessionId, reason: String },
}

enum Phase {
    Idle,
    Connecting(u64),
    Connected(ServerSocket),
}

enum Kind {
    Persistent(Listener),
    Once(OnceListener),
}

struct Entry {
    id: ListenerId,
    event: String,
    kind: Kind,
}

enum Fire {
    Persistent(Listener),
    Once(OnceListener),
}

/// Client socket connected through a [`LoopbackTransport`](super::LoopbackTransport).
#[derive(Clone)]
pub struct LoopbackSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    server: LoopbackServer,
    target: Target,
    params: TransportParams,
    runtime: Handle,
    phase: Mutex<Phase>,
    listeners: Mutex<Vec<Entry>>,
    queue: mpsc::UnboundedSender<Delivery>,
    next_listener: AtomicU64,
    attempts: AtomicU64,
}

impl LoopbackSocket {
    /// Create a socket and start its delivery pump.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when called outside a tokio runtime.
    pub(crate) fn open(
        server: LoopbackServer,
        target: Target,
        params: TransportParams,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::Transport(e.to_string()))?;
        let (queue, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SocketInner {
            server,
            target,
            params,
            runtime,
            phase: Mutex::new(Phase::Idle),
            listeners: Mutex::new(Vec::new()),
            queue,
            next_listener: AtomicU64::new(1),
            attempts: AtomicU64::new(0),
        });
        inner.runtime.spawn(pump(Arc::downgrade(&inner), rx));

        debug!(
            authority = %inner.target.authority,
            namespace = %inner.target.namespace,
            "loopback socket opened"
        );
        Ok(Self { inner })
    }

    /// The namespace this socket targets.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.target.namespace
    }

    /// Number of listeners currently armed.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    fn register(&self, event: &str, kind: Kind) -> ListenerId {
        let id = ListenerId::new(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push(Entry {
            id,
            event: event.to_string(),
            kind,
        });
        id
    }
}

impl Socket for LoopbackSocket {
    fn id(&self) -> Option<SessionId> {
        match &*lock(&self.inner.phase) {
            Phase::Connected(peer) => Some(peer.id().clone()),
            _ => None,
        }
    }

    fn is_connected(&self) -> bool {
        matches!(*lock(&self.inner.phase), Phase::Connected(_))
    }

    fn connect(&self) {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut phase = lock(&self.inner.phase);
            if !matches!(*phase, Phase::Idle) {
                return;
            }
            *phase = Phase::Connecting(attempt);
        }

        let mode = self.inner.server.next_handshake();
        debug!(attempt, mode = ?mode, "loopback handshake started");

        let socket = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            if let HandshakeMode::Delay(delay) = &mode {
                tokio::time::sleep(*delay).await;
            }
            if let Some(inner) = socket.upgrade() {
                inner.finish_handshake(attempt, mode);
            }
        });
    }

    fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.register(event, Kind::Persistent(listener))
    }

    fn once(&self, event: &str, listener: OnceListener) -> ListenerId {
        self.register(event, Kind::Once(listener))
    }

    fn off(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() < before
    }

    fn emit(&self, event: &str, args: Args, ack: Option<Ack>) -> Result<()> {
        if LifecycleEvent::is_reserved(event) {
            return Err(Error::Transport(format!(
                "\"{event}\" is a reserved event name"
            )));
        }

        let peer = match &*lock(&self.inner.phase) {
            Phase::Connected(peer) => peer.clone(),
            _ => return Err(Error::NotConnected),
        };

        // Replies go through our own queue so they stay ordered behind server events.
        let ack = ack.map(|ack| {
            let queue = self.inner.queue.clone();
            Box::new(move |args: Args| {
                let _ = queue.send(Delivery::Ack { ack, args });
            }) as Ack
        });

        peer.deliver(Inbound {
            event: event.to_string(),
            args,
            ack,
        })
    }

    fn disconnect(&self) {
        let previous = std::mem::replace(&mut *lock(&self.inner.phase), Phase::Idle);
        match previous {
            Phase::Connected(peer) => {
                if let Some(namespace) = peer.namespace() {
                    namespace.release(peer.id());
                }
                debug!(session_id = %peer.id(), "loopback client closing session");
                self.inner.enqueue(
                    LifecycleEvent::Disconnect,
                    vec![Value::String(CLIENT_DISCONNECT_REASON.to_string())],
                );
            }
            Phase::Connecting(attempt) => {
                debug!(attempt, "loopback handshake abandoned");
            }
            Phase::Idle => {}
        }
    }
}

impl std::fmt::Debug for LoopbackSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackSocket")
            .field("target", &self.inner.target)
            .field("id", &self.id())
            .finish()
    }
}

impl SocketInner {
    fn enqueue(&self, event: LifecycleEvent, args: Args) {
        let _ = self.queue.send(Delivery::Event {
            event: event.as_str().to_string(),
            args,
        });
    }

    fn is_current(&self, attempt: u64) -> bool {
        matches!(*lock(&self.phase), Phase::Connecting(a) if a == attempt)
    }

    fn abandon(&self, attempt: u64, event: LifecycleEvent, message: &str) {
        {
            let mut phase = lock(&self.phase);
            if !matches!(*phase, Phase::Connecting(a) if a == attempt) {
                return;
            }
            *phase = Phase::Idle;
        }
        warn!(
            authority = %self.target.authority,
            namespace = %self.target.namespace,
            %event,
            reason = message,
            "loopback handshake failed"
        );
        self.enqueue(event, vec![Value::String(message.to_string())]);
    }

    fn refusal(&self) -> Option<&'static str> {
        if self.target.authority != self.server.authority() {
            return Some("connection refused");
        }
        if self.params.get("transports").is_some() {
            let usable = self.params.transports().is_some_and(|list| {
                list.iter().any(|t| SUPPORTED_TRANSPORTS.contains(t))
            });
            if !usable {
                return Some("no usable transport");
            }
        }
        None
    }

    fn finish_handshake(&self, attempt: u64, mode: HandshakeMode) {
        if !self.is_current(attempt) {
            return;
        }

        match mode {
            HandshakeMode::Silent => return,
            HandshakeMode::Refuse(message) => {
                return self.abandon(attempt, LifecycleEvent::ConnectError, &message);
            }
            HandshakeMode::Fault(message) => {
                return self.abandon(attempt, LifecycleEvent::Error, &message);
            }
            HandshakeMode::Accept | HandshakeMode::Delay(_) => {}
        }

        if let Some(reason) = self.refusal() {
            return self.abandon(attempt, LifecycleEvent::ConnectError, reason);
        }

        let Some(namespace) = self.server.find_namespace(&self.target.namespace) else {
            return self.abandon(attempt, LifecycleEvent::ConnectError, "Invalid namespace");
        };

        let peer = namespace.admit(SessionId::generate(), self.queue.clone());
        {
            let mut phase = lock(&self.phase);
            if !matches!(*phase, Phase::Connecting(a) if a == attempt) {
                drop(phase);
                namespace.release(peer.id());
                return;
            }
            *phase = Phase::Connected(peer.clone());
        }

        self.enqueue(LifecycleEvent::Connect, Vec::new());
        namespace.greet(&peer);
    }

    fn handle(&self, delivery: Delivery) {
        match delivery {
            Delivery::Event { event, args } => self.dispatch(&event, args),
            Delivery::Ack { ack, args } => ack(args),
            Delivery::Closed { id, reason } => {
                let closed = {
                    let mut phase = lock(&self.phase);
                    let current = matches!(&*phase, Phase::Connected(peer) if *peer.id() == id);
                    if current {
                        *phase = Phase::Idle;
                    }
                    current
                };
                if closed {
                    self.dispatch(LifecycleEvent::Disconnect.as_str(), vec![Value::String(reason)]);
                }
            }
        }
    }

    fn dispatch(&self, event: &str, args: Args) {
        let fire: Vec<Fire> = {
            let mut listeners = lock(&self.listeners);
            let mut fire = Vec::new();
            let mut kept = Vec::with_capacity(listeners.len());
            for entry in listeners.drain(..) {
                if entry.event != event {
                    kept.push(entry);
                    continue;
                }
                let Entry { id, event, kind } = entry;
                match kind {
                    Kind::Persistent(listener) => {
                        fire.push(Fire::Persistent(listener.clone()));
                        kept.push(Entry {
                            id,
                            event,
                            kind: Kind::Persistent(listener),
                        });
                    }
                    Kind::Once(listener) => fire.push(Fire::Once(listener)),
                }
            }
            *listeners = kept;
            fire
        };

        debug!(event, listeners = fire.len(), "loopback delivery");
        for listener in fire {
            match listener {
                Fire::Persistent(listener) => listener(args.clone()),
                Fire::Once(listener) => listener(args.clone()),
            }
        }
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        let phase = std::mem::replace(&mut *lock(&self.phase), Phase::Idle);
        if let Phase::Connected(peer) = phase {
            if let Some(namespace) = peer.namespace() {
                namespace.release(peer.id());
            }
        }
    }
}

async fn pump(socket: Weak<SocketInner>, mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = rx.recv().await {
        let Some(inner) = socket.upgrade() else { break };
        inner.handle(delivery);
    }
}
