//! Test harness shared by the integration tests.
//!
//! Provides the fixture server every suite connects to and the tracing setup
//! (`RUST_LOG=iounit=debug cargo test` shows the connection lifecycle).

#![allow(dead_code)]

mod server;

pub use server::TestServer;

use std::future::Future;
use std::time::Duration;

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Await `fut`, failing the test if it takes longer than five seconds.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation did not finish within 5s")
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}
