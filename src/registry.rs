//! Registry of live connection handles.
//!
//! Factories register every handle whose handshake succeeded. A handle
//! removes itself when its socket reports `disconnect`, keyed by the session
//! id it was registered under, so two handles for one session never outlive
//! that session.

use std::sync::Mutex;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::transport::SessionId;
use crate::util::lock;

/// Ordered set of live handles shared by one or more factories.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<Vec<(SessionId, ConnectionHandle)>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: SessionId, handle: ConnectionHandle) {
        let live = {
            let mut entries = lock(&self.entries);
            entries.push((id, handle));
            entries.len()
        };
        debug!(live, "handle registered");
    }

    /// Remove every handle registered under `id`. Returns how many were removed.
    pub fn remove(&self, id: &SessionId) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(registered, _)| registered != id);
        before - entries.len()
    }

    /// Snapshot of the live handles in registration order.
    #[must_use]
    pub fn get_all(&self) -> Vec<ConnectionHandle> {
        lock(&self.entries)
            .iter()
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Whether a handle is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        lock(&self.entries)
            .iter()
            .any(|(registered, _)| registered == id)
    }

    /// Number of registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether no handle is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnect every registered handle concurrently.
    ///
    /// Each handle leaves the registry as its disconnect completes.
    ///
    /// # Errors
    ///
    /// Returns the first disconnect failure. Handles that did disconnect stay
    /// removed.
    pub async fn disconnect_all(&self) -> Result<()> {
        let handles = self.get_all();
        if handles.is_empty() {
            return Ok(());
        }
        info!(count = handles.len(), "disconnecting all connections");
        try_join_all(handles.iter().map(|handle| handle.disconnect())).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("live", &self.len())
            .finish()
    }
}
