//! # Relay Testing
//!
//! In-memory fakes for exercising request/reply flows without a broker or Redis.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: topic logs with consumer-group cursors and fault injection
//! - [`InMemoryRendezvousStore`]: TTL mailbox driven by the tokio clock, so
//!   `#[tokio::test(start_paused = true)]` tests can assert expiry exactly
//! - [`init_test_tracing`]: opt-in log output for debugging a test
//!
//! ## Example
//!
//! ```
//! use relay_core::{MessageBroker, RendezvousStore};
//! use relay_testing::{InMemoryBroker, InMemoryRendezvousStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! broker.publish("store-validation-request", "c-1", b"{}").await?;
//! assert_eq!(broker.published("store-validation-request").len(), 1);
//!
//! let store = InMemoryRendezvousStore::new();
//! store.put("response:c-1", b"true", Duration::from_secs(10)).await?;
//! assert_eq!(store.get("response:c-1").await?, Some(b"true".to_vec()));
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod store;

pub use broker::InMemoryBroker;
pub use store::InMemoryRendezvousStore;

/// Install a `tracing` subscriber writing to the test output.
///
/// Honors `RUST_LOG`; safe to call from every test (later calls are no-ops).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
