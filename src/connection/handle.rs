//! Connection handle.
//!
//! [`ConnectionHandle`] wraps a connected [`Socket`] and exposes its callback
//! API as futures: [`on`](ConnectionHandle::on) resolves with the next
//! occurrence of an event and [`emit`](ConnectionHandle::emit) with the
//! settled acknowledgement. A persistent `disconnect` watcher keeps the
//! registry in sync with the socket.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::handshake::handshake;
use super::state::ConnectionState;
use crate::ack::AckHandler;
use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::transport::{Args, LifecycleEvent, ListenerId, SessionId, Socket, describe};
use crate::util::lock;

/// Outcome of [`ConnectionHandle::emit`]: the acknowledgement handler's verdict.
pub type Acknowledged = BoxFuture<'static, Result<Value>>;

/// A connected socket wrapped in future-returning operations.
///
/// Cloning is cheap; every clone drives the same socket.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    socket: Arc<dyn Socket>,
    ack_handler: AckHandler,
    registry: Weak<ConnectionRegistry>,
    address: String,
    connect_timeout: Duration,
    session: Mutex<SessionId>,
    state: Mutex<ConnectionState>,
    watcher: Mutex<Option<ListenerId>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        socket: Arc<dyn Socket>,
        ack_handler: AckHandler,
        registry: &Arc<ConnectionRegistry>,
        address: String,
        connect_timeout: Duration,
        session: SessionId,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                socket,
                ack_handler,
                registry: Arc::downgrade(registry),
                address,
                connect_timeout,
                session: Mutex::new(session),
                state: Mutex::new(ConnectionState::Connected),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Session id the handle was last registered under.
    #[must_use]
    pub fn id(&self) -> SessionId {
        lock(&self.inner.session).clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    /// Whether the handle is connected and its socket holds a session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected() && self.inner.socket.is_connected()
    }

    /// Address the socket was opened against.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Timeout applied to `reconnect`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.inner.connect_timeout
    }

    /// The underlying transport socket.
    #[must_use]
    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.inner.socket
    }

    /// Whether both handles drive the same socket.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wait for the next occurrence of `event`.
    ///
    /// The listener is armed immediately, so events emitted after this call
    /// returns are observed even if the future is polled later.
    pub fn on(&self, event: &str) -> NextEvent {
        let (tx, rx) = oneshot::channel();
        let listener = self.inner.socket.once(
            event,
            Box::new(move |args: Args| {
                let _ = tx.send(args);
            }),
        );
        debug!(event, listener = listener.get(), "waiting for event");
        NextEvent {
            rx,
            socket: self.inner.socket.clone(),
            listener: Some(listener),
        }
    }

    /// Emit `event` and wait for the acknowledgement.
    ///
    /// The event is sent before this returns. The returned future resolves
    /// with whatever the acknowledgement handler makes of the reply.
    pub fn emit(&self, event: &str, args: Args) -> Acknowledged {
        let (tx, rx) = oneshot::channel();
        let sent = self.inner.socket.emit(
            event,
            args,
            Some(Box::new(move |reply: Args| {
                let _ = tx.send(reply);
            })),
        );
        let handler = self.inner.ack_handler.clone();
        let event = event.to_string();

        async move {
            sent?;
            let reply = rx.await.map_err(|_| Error::ConnectionClosed)?;
            debug!(event, args = reply.len(), "acknowledgement received");
            handler.settle(reply).await
        }
        .boxed()
    }

    /// Disconnect and wait until the socket reports `disconnect`.
    ///
    /// Resolves immediately if the socket is already disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket dropped the listener
    /// without reporting the disconnect.
    pub async fn disconnect(&self) -> Result<()> {
        let closed = self.on(LifecycleEvent::Disconnect.as_str());
        if !self.inner.socket.is_connected() {
            drop(closed);
            self.inner.socket.disconnect();
            self.deregister("already disconnected");
            return Ok(());
        }

        debug!(session_id = %self.id(), "disconnecting");
        self.inner.socket.disconnect();
        closed.await?;
        Ok(())
    }

    /// Re-run the handshake on the same socket and register the new session.
    ///
    /// Connected handles are left alone. On failure the handle moves to
    /// [`ConnectionState::Failed`] and can be reconnected again.
    ///
    /// # Errors
    ///
    /// Returns the handshake error, or [`Error::Transport`] if another
    /// reconnect is already running.
    pub async fn reconnect(&self) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            match *state {
                ConnectionState::Connected if self.inner.socket.is_connected() => return Ok(()),
                ConnectionState::Reconnecting => {
                    return Err(Error::Transport("reconnect already in progress".into()));
                }
                _ => *state = ConnectionState::Reconnecting,
            }
        }
        self.deregister("reconnecting");

        let mut attempt = Attempt {
            state: &self.inner.state,
            done: false,
        };
        info!(address = %self.inner.address, "reconnecting");
        let outcome = handshake(&self.inner.socket, self.inner.connect_timeout).await;
        attempt.done = true;

        match outcome {
            Ok(id) => {
                *lock(&self.inner.session) = id;
                *lock(&self.inner.state) = ConnectionState::Connected;
                self.attach();
                Ok(())
            }
            Err(err) => {
                *lock(&self.inner.state) = ConnectionState::Failed;
                warn!(address = %self.inner.address, error = %err, "reconnect failed");
                Err(err)
            }
        }
    }

    /// Register with the registry and remove again once `disconnect` fires.
    pub(crate) fn attach(&self) {
        let id = self.id();
        let Some(registry) = self.inner.registry.upgrade() else {
            return;
        };
        registry.register(id.clone(), self.clone());

        let handle = Arc::downgrade(&self.inner);
        let watched = id.clone();
        let watcher = self.inner.socket.on(
            LifecycleEvent::Disconnect.as_str(),
            Arc::new(move |args: Args| {
                if let Some(inner) = handle.upgrade() {
                    ConnectionHandle { inner }.disconnected(&watched, &describe(&args));
                }
            }),
        );
        if let Some(previous) = lock(&self.inner.watcher).replace(watcher) {
            self.inner.socket.off(previous);
        }

        if self.inner.socket.id().as_ref() != Some(&id) {
            self.disconnected(&id, "closed during registration");
            return;
        }
        info!(
            session_id = %id,
            address = %self.inner.address,
            live = registry.len(),
            "connection established"
        );
    }

    fn disconnected(&self, id: &SessionId, reason: &str) {
        // A stale event from an earlier session while the socket still holds `id`.
        if self.inner.socket.id().as_ref() == Some(id) {
            return;
        }
        {
            let mut state = lock(&self.inner.state);
            if *lock(&self.inner.session) != *id || !state.is_connected() {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        self.deregister(reason);
    }

    fn deregister(&self, reason: &str) {
        let id = self.id();
        if let Some(watcher) = lock(&self.inner.watcher).take() {
            self.inner.socket.off(watcher);
        }
        {
            let mut state = lock(&self.inner.state);
            if state.is_connected() {
                *state = ConnectionState::Disconnected;
            }
        }
        if let Some(registry) = self.inner.registry.upgrade() {
            if registry.remove(&id) > 0 {
                info!(session_id = %id, reason, "connection deregistered");
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("address", &self.inner.address)
            .finish_non_exhaustive()
    }
}

/// Marks an unfinished reconnect as failed when its future is dropped.
struct Attempt<'a> {
    state: &'a Mutex<ConnectionState>,
    done: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.done {
            *lock(self.state) = ConnectionState::Failed;
        }
    }
}

/// Future returned by [`ConnectionHandle::on`].
///
/// Resolves with the event arguments. Dropping it before it resolves removes
/// the listener from the socket.
#[must_use = "futures do nothing unless polled"]
pub struct NextEvent {
    rx: oneshot::Receiver<Args>,
    socket: Arc<dyn Socket>,
    listener: Option<ListenerId>,
}

impl Future for NextEvent {
    type Output = Result<Args>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(outcome) => outcome,
        };
        self.listener = None;
        Poll::Ready(outcome.map_err(|_| Error::ConnectionClosed))
    }
}

impl Drop for NextEvent {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.socket.off(id);
        }
    }
}

impl std::fmt::Debug for NextEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextEvent")
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}
