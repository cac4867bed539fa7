//! Breaker-guarded publishing.
//!
//! Every outbound publish of a process goes through one [`GuardedPublisher`],
//! which wraps [`MessageBroker::publish`] in the process's shared
//! [`CircuitBreaker`]. A broker outage therefore opens the breaker after a few
//! failures and later publishes fail fast with [`PublishError::BreakerOpen`]
//! instead of waiting on the transport.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use relay_core::{BrokerError, CorrelationId, EncodeError, Envelope, MessageBroker};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors from a guarded publish.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Breaker refused the publish; the broker was not contacted
    #[error("Circuit breaker '{breaker}' rejected publish to '{topic}'")]
    BreakerOpen {
        /// Name of the breaker that rejected
        breaker: String,
        /// Target topic
        topic: String,
    },

    /// Broker failed the publish (counted toward the breaker's failure budget)
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Message body could not be turned into an envelope
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Publishes envelopes through a shared circuit breaker.
#[derive(Clone)]
pub struct GuardedPublisher {
    broker: Arc<dyn MessageBroker>,
    breaker: CircuitBreaker,
}

impl GuardedPublisher {
    /// Create a publisher over `broker`, guarded by `breaker`.
    ///
    /// Pass clones of the same breaker to every publisher that should share one
    /// failure budget.
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, breaker: CircuitBreaker) -> Self {
        Self { broker, breaker }
    }

    /// The breaker guarding this publisher.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The underlying broker.
    #[must_use]
    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    /// Publish an envelope to `topic`, keyed by its correlation identifier.
    ///
    /// # Errors
    ///
    /// - [`PublishError::BreakerOpen`] if the breaker is open or out of probes
    /// - [`PublishError::Broker`] if the broker fails the publish
    pub async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), PublishError> {
        let key = envelope.correlation_id().as_str();
        let payload = envelope.to_bytes();
        let start = Instant::now();

        let result = self
            .breaker
            .execute(|| self.broker.publish(topic, key, &payload))
            .await;

        match result {
            Ok(()) => {
                metrics::counter!("relay_messages_published_total", "topic" => topic.to_string())
                    .increment(1);
                tracing::debug!(
                    topic,
                    correlation_id = key,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Published message"
                );
                Ok(())
            }
            Err(CircuitBreakerError::Inner(e)) => {
                metrics::counter!("relay_publish_errors_total", "topic" => topic.to_string())
                    .increment(1);
                tracing::error!(topic, correlation_id = key, error = %e, "Publish failed");
                Err(PublishError::Broker(e))
            }
            Err(CircuitBreakerError::Open | CircuitBreakerError::TooManyRequests) => {
                Err(PublishError::BreakerOpen {
                    breaker: self.breaker.name().to_string(),
                    topic: topic.to_string(),
                })
            }
        }
    }

    /// Wrap `body` in an envelope under `correlation_id` and publish it.
    ///
    /// # Errors
    ///
    /// [`PublishError::Encode`] if the body is not a JSON object, otherwise as
    /// [`publish`](Self::publish).
    pub async fn publish_body<T: serde::Serialize + Sync>(
        &self,
        topic: &str,
        correlation_id: &CorrelationId,
        body: &T,
    ) -> Result<(), PublishError> {
        let envelope = Envelope::wrap(correlation_id, body)?;
        self.publish(topic, &envelope).await
    }
}

impl std::fmt::Debug for GuardedPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedPublisher")
            .field("breaker", &self.breaker.name())
            .finish_non_exhaustive()
    }
}
