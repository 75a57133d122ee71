//! Connection factory.
//!
//! A [`ConnectionFactory`] owns a validated [`FactoryConfig`], a
//! [`Transport`] and a shared [`ConnectionRegistry`]. Every successful
//! connect is registered there, so a test teardown can close whatever its
//! body opened with one [`ConnectionRegistry::disconnect_all`] call.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::ack::AckHandler;
use crate::config::{DEFAULT_BATCH_SIZE, FactoryConfig, validate_address};
use crate::connection::ConnectionHandle;
use crate::connection::handshake::handshake;
use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::transport::Transport;

/// Produces registered [`ConnectionHandle`]s from one configuration.
///
/// Cloning is cheap; clones share the configuration, transport and registry.
#[derive(Clone)]
pub struct ConnectionFactory {
    inner: Arc<FactoryInner>,
}

struct FactoryInner {
    config: FactoryConfig,
    ack_handler: AckHandler,
    transport: Arc<dyn Transport>,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionFactory {
    /// Create a factory with its own empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(config: FactoryConfig, transport: impl Transport) -> Result<Self> {
        Self::with_registry(config, transport, Arc::new(ConnectionRegistry::new()))
    }

    /// Create a factory that registers into an existing registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn with_registry(
        config: FactoryConfig,
        transport: impl Transport,
        registry: Arc<ConnectionRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let ack_handler = config
            .ack_handler
            .clone()
            .ok_or_else(|| Error::InvalidConfig("missing acknowledgement handler".into()))?;

        debug!(
            address = %config.address,
            timeout_ms = config.connect_timeout.as_millis() as u64,
            "connection factory created"
        );
        Ok(Self {
            inner: Arc::new(FactoryInner {
                config,
                ack_handler,
                transport: Arc::new(transport),
                registry,
            }),
        })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &FactoryConfig {
        &self.inner.config
    }

    /// The registry successful connections are added to.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    /// Connect to the configured address with the configured handler.
    ///
    /// # Errors
    ///
    /// See [`connect_to`](Self::connect_to).
    pub async fn connect(&self) -> Result<ConnectionHandle> {
        self.connect_to(None, None).await
    }

    /// Connect, optionally overriding the address and acknowledgement handler.
    ///
    /// Transport parameters are always the configured ones merged over the
    /// defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] for a blank override address
    /// - [`Error::ConnectError`] when the remote refused the session
    /// - [`Error::Transport`] on a transport error during the handshake
    /// - [`Error::ConnectTimeout`] when the handshake did not finish in time
    pub async fn connect_to(
        &self,
        address: Option<&str>,
        ack_handler: Option<AckHandler>,
    ) -> Result<ConnectionHandle> {
        let config = &self.inner.config;
        let address = match address {
            Some(address) => {
                validate_address(address)?;
                address
            }
            None => config.address.as_str(),
        };
        let ack_handler = ack_handler.unwrap_or_else(|| self.inner.ack_handler.clone());
        let params = config.merged_params();

        debug!(address, params = params.len(), "opening socket");
        let socket = self.inner.transport.open(address, &params)?;
        let id = handshake(&socket, config.connect_timeout).await?;

        let handle = ConnectionHandle::new(
            socket,
            ack_handler,
            &self.inner.registry,
            address.to_string(),
            config.connect_timeout,
            id,
        );
        handle.attach();
        Ok(handle)
    }

    /// Open `count` connections concurrently.
    ///
    /// All-or-nothing: the first failure is returned. Handles that already
    /// connected stay registered and attempts still in flight keep running.
    ///
    /// # Errors
    ///
    /// Returns the first failing attempt's error, or [`Error::Task`] if an
    /// attempt's task panicked.
    pub async fn connect_many(&self, count: usize) -> Result<Vec<ConnectionHandle>> {
        info!(count, address = %self.inner.config.address, "opening connections");
        let tasks: Vec<_> = (0..count)
            .map(|_| {
                let factory = self.clone();
                tokio::spawn(async move { factory.connect().await })
            })
            .collect();

        try_join_all(
            tasks
                .into_iter()
                .map(|task| async move { Ok::<_, Error>(task.await??) }),
        )
        .await
    }

    /// Open [`DEFAULT_BATCH_SIZE`] connections concurrently.
    ///
    /// # Errors
    ///
    /// See [`connect_many`](Self::connect_many).
    pub async fn connect_pair(&self) -> Result<Vec<ConnectionHandle>> {
        self.connect_many(DEFAULT_BATCH_SIZE).await
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}
