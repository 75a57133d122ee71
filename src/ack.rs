//! Acknowledgement policy.
//!
//! An [`AckHandler`] turns the arguments of a remote acknowledgement into the
//! outcome of [`ConnectionHandle::emit`](crate::ConnectionHandle::emit). There
//! is exactly one contract:
//!
//! - the handler may be synchronous ([`AckHandler::from_fn`]) or asynchronous
//!   ([`AckHandler::new`]),
//! - `Err` rejects the emit and `Ok(value)` resolves it with `value`,
//! - a panic while producing the outcome is reported as
//!   [`Error::MalformedHandler`].
//!
//! ```rust,ignore
//! use iounit::{AckHandler, Error};
//! use serde_json::Value;
//!
//! let handler = AckHandler::from_fn(|args| match args.first() {
//!     Some(reply) if reply["status"] == Value::Bool(true) => Ok(reply.clone()),
//!     other => Err(Error::Rejected(other.cloned().unwrap_or(Value::Null))),
//! });
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::transport::Args;

/// Future produced by an acknowledgement handler.
pub type AckFuture = BoxFuture<'static, Result<Value>>;

type HandlerFn = dyn Fn(Args) -> AckFuture + Send + Sync;

/// Maps acknowledgement arguments to a success value or a rejection.
#[derive(Clone)]
pub struct AckHandler {
    handler: Arc<HandlerFn>,
}

impl AckHandler {
    /// Wrap an asynchronous handler.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }

    /// Wrap a synchronous handler.
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(Args) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(move |args| futures::future::ready(handler(args)).boxed()),
        }
    }

    /// Resolve with the first argument when its `status` field is `true`,
    /// reject with [`Error::Rejected`] otherwise.
    #[must_use]
    pub fn status() -> Self {
        Self::from_fn(|args| {
            let reply = args.into_iter().next().unwrap_or(Value::Null);
            if reply.get("status") == Some(&Value::Bool(true)) {
                Ok(reply)
            } else {
                Err(Error::Rejected(reply))
            }
        })
    }

    /// Resolve with the first argument, or `null` if there is none.
    #[must_use]
    pub fn first() -> Self {
        Self::from_fn(|args| Ok(args.into_iter().next().unwrap_or(Value::Null)))
    }

    /// Run the handler on acknowledgement arguments.
    ///
    /// # Errors
    ///
    /// Returns the handler's own error, or [`Error::MalformedHandler`] if it panicked.
    pub async fn settle(&self, args: Args) -> Result<Value> {
        let fut = catch_unwind(AssertUnwindSafe(|| (self.handler)(args)))
            .map_err(|panic| malformed(panic.as_ref()))?;
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(malformed(panic.as_ref())),
        }
    }
}

impl std::fmt::Debug for AckHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandler").finish_non_exhaustive()
    }
}

fn malformed(panic: &(dyn Any + Send)) -> Error {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    };
    tracing::warn!(reason = %message, "acknowledgement handler panicked");
    Error::MalformedHandler(message)
}
