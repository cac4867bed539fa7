//! Rendezvous store abstraction.
//!
//! The rendezvous store is a shared key/value store with per-key expiry, used as
//! a short-lived mailbox between a terminal consumer (the writer) and an
//! orchestrator call that is still waiting (the reader).
//!
//! # Entry Lifecycle
//!
//! - **Key**: `response:<correlation_id>` (see [`response_key`])
//! - **Written once** by the terminal consumer that handles the matching response
//! - **Read non-destructively** by the waiter; reading does not delete
//! - **Destroyed by TTL** only; the TTL is fixed by the writer and is independent
//!   of whether the entry is ever read
//!
//! # Concurrency
//!
//! Many consumer loops write and many in-flight calls read at once. Entries are
//! distinguished only by key and no cross-key coordination is needed, but every
//! single-key `put` and `get` must be atomic in the implementation.

use crate::correlation::CorrelationId;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Key prefix for rendezvous entries.
pub const RESPONSE_KEY_PREFIX: &str = "response:";

/// Default lifetime of a rendezvous entry.
///
/// Must stay at or above the waiter deadline, otherwise an answer can expire
/// before a still-waiting caller observes it.
pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(10);

/// Build the rendezvous key for a correlation identifier.
#[must_use]
pub fn response_key(correlation_id: &CorrelationId) -> String {
    format!("{RESPONSE_KEY_PREFIX}{correlation_id}")
}

/// Errors from rendezvous store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Rendezvous store connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed an operation
    #[error("Rendezvous store operation failed: {0}")]
    Operation(String),
}

/// Key/value mailbox with per-key expiry.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be shared as
/// `Arc<dyn RendezvousStore>` between consumer loops and waiters.
pub trait RendezvousStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value, expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn put(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Read the value under `key`, or `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send + '_>>;
}
