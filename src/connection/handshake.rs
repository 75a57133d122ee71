//! Connect handshake race.
//!
//! Four outcomes compete: `connect`, `connect_error`, `error` and the timer.
//! Each one tries to claim the same single-assignment slot; only the first
//! claim is acted on.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::{Args, LifecycleEvent, ListenerId, SessionId, Socket, describe};
use crate::util::lock;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Connected,
    Refused(String),
    Faulted(String),
    TimedOut,
}

/// Single-assignment slot deciding the handshake outcome.
struct Race {
    slot: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl Race {
    fn new() -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let race = Arc::new(Self {
            slot: Mutex::new(Some(tx)),
        });
        (race, rx)
    }

    /// Claim the slot. Returns `false` if another outcome already won.
    fn settle(&self, outcome: Outcome) -> bool {
        match lock(&self.slot).take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Lifecycle listeners armed for one race; removed on drop.
struct Armed<'a> {
    socket: &'a Arc<dyn Socket>,
    listeners: Vec<ListenerId>,
}

impl<'a> Armed<'a> {
    fn new(socket: &'a Arc<dyn Socket>, race: &Arc<Race>) -> Self {
        let arm = |event: LifecycleEvent, outcome: fn(&Args) -> Outcome| {
            let race = race.clone();
            socket.once(
                event.as_str(),
                Box::new(move |args: Args| {
                    race.settle(outcome(&args));
                }),
            )
        };

        let listeners = vec![
            arm(LifecycleEvent::Connect, |_| Outcome::Connected),
            arm(LifecycleEvent::ConnectError, |args| {
                Outcome::Refused(describe(args))
            }),
            arm(LifecycleEvent::Error, |args| Outcome::Faulted(describe(args))),
        ];
        debug!(listeners = listeners.len(), "handshake listeners armed");
        Self { socket, listeners }
    }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.socket.off(id);
        }
    }
}

/// Start the handshake on `socket` and wait for its outcome.
///
/// Returns the session id on `connect`. A `connect` arriving after the timer
/// won is ignored: the listeners are gone by then.
///
/// # Errors
///
/// - [`Error::ConnectError`] when the remote refused the session
/// - [`Error::Transport`] on a generic transport error; the socket is
///   disconnected first
/// - [`Error::ConnectTimeout`] when no outcome arrived within `timeout`
pub(crate) async fn handshake(socket: &Arc<dyn Socket>, timeout: Duration) -> Result<SessionId> {
    let (race, mut rx) = Race::new();
    let armed = Armed::new(socket, &race);

    socket.connect();
    if socket.is_connected() {
        race.settle(Outcome::Connected);
    }

    let outcome = match tokio::time::timeout(timeout, &mut rx).await {
        Ok(outcome) => outcome.map_err(|_| Error::ConnectionClosed)?,
        Err(_) => {
            // The timer only wins if nothing claimed the slot in the meantime.
            race.settle(Outcome::TimedOut);
            rx.await.map_err(|_| Error::ConnectionClosed)?
        }
    };
    drop(armed);

    match outcome {
        Outcome::Connected => {
            let id = socket.id().ok_or(Error::ConnectionClosed)?;
            debug!(session_id = %id, "handshake completed");
            Ok(id)
        }
        Outcome::Refused(reason) => {
            warn!(%reason, "connection refused");
            Err(Error::ConnectError(reason))
        }
        Outcome::Faulted(reason) => {
            warn!(%reason, "transport error during handshake");
            socket.disconnect();
            Err(Error::Transport(reason))
        }
        Outcome::TimedOut => {
            warn!(timeout_ms = timeout.as_millis() as u64, "handshake timed out");
            Err(Error::ConnectTimeout { timeout })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_race_settles_once() {
        let (race, mut rx) = Race::new();
        assert!(race.settle(Outcome::Refused("nope".into())));
        assert!(!race.settle(Outcome::Connected));
        assert!(!race.settle(Outcome::TimedOut));
        assert_eq!(rx.try_recv().unwrap(), Outcome::Refused("nope".into()));
    }

    #[cfg(feature = "loopback")]
    mod loopback {
        use super::*;
        use crate::config::TransportParams;
        use crate::transport::Transport;
        use crate::transport::loopback::{HandshakeMode, LoopbackServer, LoopbackSocket, Target};

        fn open(server: &LoopbackServer) -> Arc<dyn Socket> {
            server
                .transport()
                .open("http://localhost:8080", &TransportParams::defaults())
                .unwrap()
        }

        #[tokio::test]
        async fn test_connect_wins() {
            let server = LoopbackServer::new("localhost:8080");
            let socket = open(&server);
            let id = handshake(&socket, Duration::from_secs(2)).await.unwrap();
            assert_eq!(socket.id(), Some(id));
        }

        #[tokio::test]
        async fn test_refusal_wins() {
            let server = LoopbackServer::new("localhost:8080");
            server.set_handshake(HandshakeMode::Refuse("go away".into()));
            let socket = open(&server);
            let err = handshake(&socket, Duration::from_secs(2)).await.unwrap_err();
            assert_eq!(err, Error::ConnectError("go away".into()));
        }

        #[tokio::test]
        async fn test_fault_disconnects() {
            let server = LoopbackServer::new("localhost:8080");
            server.set_handshake(HandshakeMode::Fault("boom".into()));
            let socket = open(&server);
            let err = handshake(&socket, Duration::from_secs(2)).await.unwrap_err();
            assert_eq!(err, Error::Transport("boom".into()));
            assert!(!socket.is_connected());
        }

        #[tokio::test(start_paused = true)]
        async fn test_timer_wins() {
            let server = LoopbackServer::new("localhost:8080");
            server.set_handshake(HandshakeMode::Silent);
            let socket = open(&server);
            let timeout = Duration::from_millis(2000);
            let err = handshake(&socket, timeout).await.unwrap_err();
            assert_eq!(err, Error::ConnectTimeout { timeout });
        }

        #[tokio::test]
        async fn test_listeners_disarmed_after_race() {
            let server = LoopbackServer::new("localhost:8080");
            let target = Target::parse("http://localhost:8080").unwrap();
            let socket =
                LoopbackSocket::open(server.clone(), target, TransportParams::defaults()).unwrap();
            let handle: Arc<dyn Socket> = Arc::new(socket.clone());

            handshake(&handle, Duration::from_secs(2)).await.unwrap();
            assert_eq!(socket.listener_count(), 0);
        }

        #[tokio::test]
        async fn test_repeated_handshakes_on_one_socket() {
            let server = LoopbackServer::new("localhost:8080");
            let socket = open(&server);

            let first = handshake(&socket, Duration::from_secs(2)).await.unwrap();
            socket.disconnect();
            let second = handshake(&socket, Duration::from_secs(2)).await.unwrap();

            assert_ne!(first, second);
            assert_eq!(socket.id(), Some(second));
        }

        #[tokio::test(start_paused = true)]
        async fn test_late_connect_finds_no_listeners() {
            let server = LoopbackServer::new("localhost:8080");
            server.set_handshake(HandshakeMode::Delay(Duration::from_millis(3000)));
            let target = Target::parse("http://localhost:8080").unwrap();
            let socket =
                LoopbackSocket::open(server.clone(), target, TransportParams::defaults()).unwrap();
            let handle: Arc<dyn Socket> = Arc::new(socket.clone());

            let timeout = Duration::from_millis(100);
            let err = handshake(&handle, timeout).await.unwrap_err();
            assert_eq!(err, Error::ConnectTimeout { timeout });
            assert_eq!(socket.listener_count(), 0);

            // The socket outlives the race, so the delayed accept does run.
            tokio::time::sleep(Duration::from_millis(5000)).await;
            assert!(handle.is_connected());
            assert_eq!(socket.listener_count(), 0);
        }
    }
}
