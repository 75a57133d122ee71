//! Configuration for connection factories.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::ack::AckHandler;
use crate::error::{Error, Result};

/// Default time allowed for the connect handshake.
///
/// Default: 2000 ms
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Transports requested when the caller does not override `transports`.
pub const DEFAULT_TRANSPORTS: [&str; 2] = ["websocket", "polling"];

/// Number of connections opened by [`ConnectionFactory::connect_pair`](crate::ConnectionFactory::connect_pair).
pub const DEFAULT_BATCH_SIZE: usize = 2;

/// Environment variable holding the full server address.
pub const ENV_URL: &str = "IOUNIT_URL";

/// Environment variable holding the connect timeout in milliseconds.
pub const ENV_CONNECT_TIMEOUT_MS: &str = "IOUNIT_CONNECT_TIMEOUT_MS";

/// Environment variable holding the local server port, used when no URL is set.
pub const ENV_SOCKET_PORT: &str = "SOCKET_PORT";

const DEFAULT_PORT: &str = "8080";

/// Transport-specific connection parameters.
///
/// An open mapping of key to JSON value handed to [`Transport::open`](crate::transport::Transport::open).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportParams(Map<String, Value>);

impl TransportParams {
    /// Create an empty parameter map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The parameters every connection starts from.
    #[must_use]
    pub fn defaults() -> Self {
        Self::new().with(
            "transports",
            Value::Array(
                DEFAULT_TRANSPORTS
                    .iter()
                    .map(|t| Value::String((*t).to_string()))
                    .collect(),
            ),
        )
    }

    /// Build parameters from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `value` is not a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidConfig(format!(
                "transport params must be a mapping, got {other}"
            ))),
        }
    }

    /// Set a parameter, replacing any previous value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a parameter in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Apply these parameters on top of [`TransportParams::defaults`].
    ///
    /// Keys set here win over the defaults.
    #[must_use]
    pub fn merged_with_defaults(&self) -> Self {
        let mut merged = Self::defaults();
        for (key, value) in &self.0 {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// The requested transport names, if `transports` is a list of strings.
    #[must_use]
    pub fn transports(&self) -> Option<Vec<&str>> {
        self.get("transports")?
            .as_array()?
            .iter()
            .map(Value::as_str)
            .collect()
    }

    /// View as a JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for TransportParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Configuration held by a [`ConnectionFactory`](crate::ConnectionFactory).
///
/// Built with [`FactoryConfig::new`] and the `with_*` methods, validated when
/// the factory is created.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Address connections are opened against.
    pub address: String,

    /// Policy applied to every acknowledgement.
    ///
    /// Required; a factory cannot be built without one.
    pub ack_handler: Option<AckHandler>,

    /// Maximum time for the connect handshake.
    ///
    /// Default: 2000 ms
    pub connect_timeout: Duration,

    /// Caller-supplied transport parameters, merged over the defaults on connect.
    pub params: TransportParams,
}

impl FactoryConfig {
    /// Create a configuration for `address` with default timeout and parameters.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ack_handler: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            params: TransportParams::new(),
        }
    }

    /// Build a configuration from the process environment.
    ///
    /// Reads `IOUNIT_URL` (falling back to `http://localhost:{SOCKET_PORT}`,
    /// port 8080 by default) and `IOUNIT_CONNECT_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the timeout variable is not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the timeout variable is not a number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = match lookup(ENV_URL) {
            Some(url) => url,
            None => {
                let port = lookup(ENV_SOCKET_PORT).unwrap_or_else(|| DEFAULT_PORT.to_string());
                format!("http://localhost:{port}")
            }
        };

        let mut config = Self::new(address);
        if let Some(raw) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("{ENV_CONNECT_TIMEOUT_MS} is not a number: {raw}"))
            })?;
            config.connect_timeout = Duration::from_millis(millis);
        }
        Ok(config)
    }

    /// Set the acknowledgement handler.
    #[must_use]
    pub fn with_ack_handler(mut self, handler: AckHandler) -> Self {
        self.ack_handler = Some(handler);
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replace the transport parameters.
    #[must_use]
    pub fn with_params(mut self, params: TransportParams) -> Self {
        self.params = params;
        self
    }

    /// Set a single transport parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key, value);
        self
    }

    /// The configured parameters applied over the defaults.
    #[must_use]
    pub fn merged_params(&self) -> TransportParams {
        self.params.merged_with_defaults()
    }

    /// Check the configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the address is blank, the handler
    /// is missing or the timeout is zero.
    pub fn validate(&self) -> Result<()> {
        validate_address(&self.address)?;
        if self.ack_handler.is_none() {
            return Err(Error::InvalidConfig(
                "missing acknowledgement handler".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "connect timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject blank addresses.
pub(crate) fn validate_address(address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(Error::InvalidConfig(format!("invalid address {address:?}")));
    }
    Ok(())
}
