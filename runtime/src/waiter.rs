//! Correlation waiter: poll the rendezvous store for an answer.
//!
//! The rendezvous store has no subscription primitive, so the waiter polls:
//! it reads `response:<id>` every `poll_interval` until a value appears or the
//! `deadline` passes. Only the calling task sleeps between polls.
//!
//! # Contract
//!
//! - A present entry is decoded into the caller's type and returned; a decode
//!   failure is [`WaitError::Decode`] and is not retried.
//! - With no entry, [`WaitError::Timeout`] is returned no earlier than `deadline`
//!   and no later than `deadline + poll_interval` after the call started.
//! - The entry is never deleted; TTL expiry is its only lifecycle end. The
//!   deadline must not exceed the writer's TTL, otherwise an answer can expire
//!   before it is observed and the call times out spuriously.
//!
//! A shorter poll interval lowers answer latency and raises store load.

use relay_core::{CorrelationId, DecodeError, RendezvousStore, StoreError, decode_answer, response_key};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Polling parameters.
///
/// # Default Values
///
/// - `poll_interval`: 100ms
/// - `deadline`: 5 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterConfig {
    /// Pause between two reads of the store
    pub poll_interval: Duration,
    /// Total time to wait for an answer
    pub deadline: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            deadline: Duration::from_secs(5),
        }
    }
}

impl WaiterConfig {
    /// Set the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Errors from waiting on a correlated answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// No answer was observed before the deadline
    #[error("No answer for {correlation_id} within {deadline:?}")]
    Timeout {
        /// The awaited correlation identifier
        correlation_id: CorrelationId,
        /// The deadline that elapsed
        deadline: Duration,
    },

    /// An answer was found but does not match the expected shape
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The store failed a read
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Polls the rendezvous store for a correlated answer.
#[derive(Clone)]
pub struct CorrelationWaiter {
    store: Arc<dyn RendezvousStore>,
    config: WaiterConfig,
}

impl CorrelationWaiter {
    /// Create a waiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RendezvousStore>, config: WaiterConfig) -> Self {
        Self { store, config }
    }

    /// The polling parameters.
    #[must_use]
    pub const fn config(&self) -> WaiterConfig {
        self.config
    }

    /// Wait for the answer to `correlation_id` and decode it as `T`.
    ///
    /// # Errors
    ///
    /// - [`WaitError::Timeout`] if nothing appears before the deadline
    /// - [`WaitError::Decode`] if the stored answer is not a `T`
    /// - [`WaitError::Store`] if a read fails (not retried)
    pub async fn await_answer<T: DeserializeOwned>(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<T, WaitError> {
        let key = response_key(correlation_id);
        let start = Instant::now();
        let deadline = start + self.config.deadline;

        loop {
            if let Some(bytes) = self.store.get(&key).await? {
                metrics::histogram!("relay_waiter_wait_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::debug!(
                    correlation_id = %correlation_id,
                    waited_ms = start.elapsed().as_millis(),
                    "Answer received"
                );
                return Ok(decode_answer(&bytes)?);
            }

            let now = Instant::now();
            if now >= deadline {
                metrics::counter!("relay_waiter_timeouts_total").increment(1);
                tracing::warn!(
                    correlation_id = %correlation_id,
                    deadline_ms = self.config.deadline.as_millis(),
                    "Timed out waiting for answer"
                );
                return Err(WaitError::Timeout {
                    correlation_id: correlation_id.clone(),
                    deadline: self.config.deadline,
                });
            }

            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}

impl std::fmt::Debug for CorrelationWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationWaiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
