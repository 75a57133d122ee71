//! Server side of the loopback transport.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::socket::Delivery;
use super::{HandshakeMode, LoopbackTransport, SERVER_DISCONNECT_REASON, normalize_namespace};
use crate::error::{Error, Result};
use crate::transport::{Ack, Args, SessionId};
use crate::util::{lock, read, write};

/// Request handler registered on a [`Namespace`].
///
/// Receives the peer that sent the event, the event arguments and the
/// acknowledgement callback if the client asked for one.
pub type EventHandler = Arc<dyn Fn(&ServerSocket, Args, Option<Ack>) + Send + Sync>;

type ConnectionHook = Arc<dyn Fn(&ServerSocket) + Send + Sync>;

/// An in-process server reachable through [`LoopbackTransport`].
#[derive(Clone)]
pub struct LoopbackServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    authority: String,
    default_mode: Mutex<HandshakeMode>,
    script: Mutex<VecDeque<HandshakeMode>>,
    namespaces: Mutex<HashMap<String, Namespace>>,
}

impl LoopbackServer {
    /// Create a server answering for `authority` (e.g. `localhost:8080`).
    ///
    /// The root namespace `/` always exists.
    #[must_use]
    pub fn new(authority: impl Into<String>) -> Self {
        let server = Self {
            inner: Arc::new(ServerInner {
                authority: authority.into(),
                default_mode: Mutex::new(HandshakeMode::Accept),
                script: Mutex::new(VecDeque::new()),
                namespaces: Mutex::new(HashMap::new()),
            }),
        };
        server.namespace("/");
        server
    }

    /// The authority this server answers for.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.inner.authority
    }

    /// Address of the root namespace.
    #[must_use]
    pub fn address(&self) -> String {
        format!("loopback://{}", self.inner.authority)
    }

    /// Get or create a namespace.
    pub fn namespace(&self, name: &str) -> Namespace {
        let name = normalize_namespace(name);
        lock(&self.inner.namespaces)
            .entry(name.clone())
            .or_insert_with(|| Namespace::new(name))
            .clone()
    }

    /// Look up an existing namespace.
    #[must_use]
    pub fn find_namespace(&self, name: &str) -> Option<Namespace> {
        lock(&self.inner.namespaces)
            .get(&normalize_namespace(name))
            .cloned()
    }

    /// Set how handshakes are answered once the script is exhausted.
    pub fn set_handshake(&self, mode: HandshakeMode) {
        *lock(&self.inner.default_mode) = mode;
    }

    /// Queue handshake answers consumed one per handshake, in order.
    pub fn script_handshake(&self, modes: impl IntoIterator<Item = HandshakeMode>) {
        lock(&self.inner.script).extend(modes);
    }

    pub(crate) fn next_handshake(&self) -> HandshakeMode {
        if let Some(mode) = lock(&self.inner.script).pop_front() {
            return mode;
        }
        lock(&self.inner.default_mode).clone()
    }

    /// Number of live sessions over all namespaces.
    #[must_use]
    pub fn session_count(&self) -> usize {
        lock(&self.inner.namespaces)
            .values()
            .map(Namespace::len)
            .sum()
    }

    /// A transport that opens sockets towards this server.
    #[must_use]
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport::new(self.clone())
    }
}

impl std::fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackServer")
            .field("authority", &self.inner.authority)
            .field("sessions", &self.session_count())
            .finish()
    }
}

/// A named group of sessions sharing request handlers.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<NamespaceInner>,
}

struct NamespaceInner {
    name: String,
    handlers: RwLock<HashMap<String, EventHandler>>,
    hooks: RwLock<Vec<ConnectionHook>>,
    peers: Mutex<Vec<ServerSocket>>,
}

impl Namespace {
    fn new(name: String) -> Self {
        Self {
            inner: Arc::new(NamespaceInner {
                name,
                handlers: RwLock::new(HashMap::new()),
                hooks: RwLock::new(Vec::new()),
                peers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The namespace name, always starting with `/`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register the handler for `event`, replacing any previous one.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&ServerSocket, Args, Option<Ack>) + Send + Sync + 'static,
    {
        write(&self.inner.handlers).insert(event.to_string(), Arc::new(handler));
    }

    /// Run `hook` for every session accepted from now on.
    pub fn on_connection<F>(&self, hook: F)
    where
        F: Fn(&ServerSocket) + Send + Sync + 'static,
    {
        write(&self.inner.hooks).push(Arc::new(hook));
    }

    /// Send `event` to every session. Returns how many sessions were reached.
    pub fn emit(&self, event: &str, args: Args) -> usize {
        self.peers()
            .iter()
            .filter(|peer| peer.emit(event, args.clone()))
            .count()
    }

    /// Snapshot of the live sessions, in connection order.
    #[must_use]
    pub fn peers(&self) -> Vec<ServerSocket> {
        lock(&self.inner.peers).clone()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner.peers).len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create the server side of a new session and start its inbound pump.
    pub(crate) fn admit(
        &self,
        id: SessionId,
        outbound: mpsc::UnboundedSender<Delivery>,
    ) -> ServerSocket {
        let (inbound, rx) = mpsc::unbounded_channel();
        let peer = ServerSocket {
            inner: Arc::new(PeerInner {
                id,
                namespace: Arc::downgrade(&self.inner),
                outbound,
                inbound,
            }),
        };
        lock(&self.inner.peers).push(peer.clone());
        tokio::spawn(serve(Arc::downgrade(&peer.inner), rx));

        info!(
            namespace = %self.inner.name,
            session_id = %peer.id(),
            "loopback session accepted"
        );
        peer
    }

    /// Run the connection hooks for a freshly admitted peer.
    pub(crate) fn greet(&self, peer: &ServerSocket) {
        let hooks = read(&self.inner.hooks).clone();
        for hook in hooks {
            hook(peer);
        }
    }

    /// Forget a session. Returns `false` if it was not live.
    pub(crate) fn release(&self, id: &SessionId) -> bool {
        let mut peers = lock(&self.inner.peers);
        let before = peers.len();
        peers.retain(|peer| peer.id() != id);
        peers.len() < before
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name)
            .field("sessions", &self.len())
            .finish()
    }
}

/// A client event travelling to the server.
pub(crate) struct Inbound {
    pub(crate) event: String,
    pub(crate) args: Args,
    pub(crate) ack: Option<Ack>,
}

/// The server side of one session.
#[derive(Clone)]
pub struct ServerSocket {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    id: SessionId,
    namespace: Weak<NamespaceInner>,
    outbound: mpsc::UnboundedSender<Delivery>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl ServerSocket {
    /// Session id shared with the client.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Send `event` to the client. Returns `false` if the client is gone.
    pub fn emit(&self, event: &str, args: Args) -> bool {
        self.inner
            .outbound
            .send(Delivery::Event {
                event: event.to_string(),
                args,
            })
            .is_ok()
    }

    /// Close the session from the server side.
    ///
    /// The client observes `disconnect` with reason `io server disconnect`.
    pub fn disconnect(&self) {
        if let Some(namespace) = self.namespace() {
            namespace.release(&self.inner.id);
        }
        debug!(session_id = %self.inner.id, "loopback server closing session");
        let _ = self.inner.outbound.send(Delivery::Closed {
            id: self.inner.id.clone(),
            reason: SERVER_DISCONNECT_REASON.to_string(),
        });
    }

    /// The namespace this session belongs to, while the server is alive.
    #[must_use]
    pub fn namespace(&self) -> Option<Namespace> {
        self.inner
            .namespace
            .upgrade()
            .map(|inner| Namespace { inner })
    }

    pub(crate) fn deliver(&self, inbound: Inbound) -> Result<()> {
        self.inner
            .inbound
            .send(inbound)
            .map_err(|_| Error::NotConnected)
    }
}

impl std::fmt::Debug for ServerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSocket")
            .field("id", &self.inner.id)
            .finish()
    }
}

async fn serve(peer: Weak<PeerInner>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(Inbound { event, args, ack }) = rx.recv().await {
        let Some(inner) = peer.upgrade() else { break };
        let socket = ServerSocket { inner };
        let handler = socket
            .namespace()
            .and_then(|ns| read(&ns.inner.handlers).get(&event).cloned());
        match handler {
            Some(handler) => handler(&socket, args, ack),
            None => debug!(session_id = %socket.id(), %event, "no handler for event"),
        }
    }
}
