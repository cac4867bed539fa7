//! Request/reply orchestration: the call site of a cross-service exchange.
//!
//! [`RequestReplyOrchestrator::call`] mints a correlation identifier, publishes
//! the request through the guarded publisher and waits for the correlated
//! answer. Interpreting the answer (proceed, or reject with a business error)
//! is left to the calling use case, which keeps business rejections apart from
//! the protocol failures reported here.
//!
//! Protocol failures are never retried inside the orchestrator. They surface
//! verbatim, and [`OrchestratorError::is_retryable`] tells callers which of them
//! describe a transient condition.

use crate::publisher::{GuardedPublisher, PublishError};
use crate::waiter::{CorrelationWaiter, WaitError};
use relay_core::{BrokerError, CorrelationId, DecodeError, EncodeError, Envelope, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Protocol failures of an orchestrated call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The publish breaker is open; nothing was sent
    #[error("Circuit breaker '{breaker}' is open")]
    BreakerOpen {
        /// Name of the breaker
        breaker: String,
    },

    /// The broker failed the publish
    #[error(transparent)]
    Publish(BrokerError),

    /// The request body could not be encoded
    #[error(transparent)]
    Encode(EncodeError),

    /// Upstream did not answer in time
    #[error("Upstream did not answer {correlation_id} within {deadline:?}")]
    Timeout {
        /// The unanswered correlation identifier
        correlation_id: CorrelationId,
        /// The elapsed deadline
        deadline: Duration,
    },

    /// The answer did not have the expected shape
    #[error(transparent)]
    Decode(DecodeError),

    /// The rendezvous store failed
    #[error(transparent)]
    Store(StoreError),
}

impl OrchestratorError {
    /// `true` for transient failures where calling again later may succeed.
    ///
    /// Encoding and decoding failures are deterministic and not retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BreakerOpen { .. } | Self::Publish(_) | Self::Timeout { .. } | Self::Store(_)
        )
    }
}

impl From<PublishError> for OrchestratorError {
    fn from(error: PublishError) -> Self {
        match error {
            PublishError::BreakerOpen { breaker, .. } => Self::BreakerOpen { breaker },
            PublishError::Broker(e) => Self::Publish(e),
            PublishError::Encode(e) => Self::Encode(e),
        }
    }
}

impl From<WaitError> for OrchestratorError {
    fn from(error: WaitError) -> Self {
        match error {
            WaitError::Timeout {
                correlation_id,
                deadline,
            } => Self::Timeout {
                correlation_id,
                deadline,
            },
            WaitError::Decode(e) => Self::Decode(e),
            WaitError::Store(e) => Self::Store(e),
        }
    }
}

/// Publishes requests and waits for their correlated answers.
#[derive(Debug, Clone)]
pub struct RequestReplyOrchestrator {
    publisher: GuardedPublisher,
    waiter: CorrelationWaiter,
}

impl RequestReplyOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub const fn new(publisher: GuardedPublisher, waiter: CorrelationWaiter) -> Self {
        Self { publisher, waiter }
    }

    /// The publisher used for requests and notifications.
    #[must_use]
    pub const fn publisher(&self) -> &GuardedPublisher {
        &self.publisher
    }

    /// Publish `request` to `topic` and wait for the answer.
    ///
    /// # Errors
    ///
    /// Any [`OrchestratorError`]; none of them is retried here.
    pub async fn call<Req, A>(&self, topic: &str, request: &Req) -> Result<A, OrchestratorError>
    where
        Req: Serialize + Sync,
        A: DeserializeOwned,
    {
        let correlation_id = CorrelationId::new();
        let envelope = Envelope::wrap(&correlation_id, request).map_err(OrchestratorError::Encode)?;

        tracing::debug!(topic, correlation_id = %correlation_id, "Sending request");
        self.publisher.publish(topic, &envelope).await?;

        let answer = self.waiter.await_answer(&correlation_id).await?;
        Ok(answer)
    }

    /// Publish a fire-and-forget message to `topic`.
    ///
    /// Returns the identifier the message was published under.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::BreakerOpen`], [`OrchestratorError::Publish`] or
    /// [`OrchestratorError::Encode`].
    pub async fn notify<Req>(&self, topic: &str, request: &Req) -> Result<CorrelationId, OrchestratorError>
    where
        Req: Serialize + Sync,
    {
        let correlation_id = CorrelationId::new();
        self.publisher
            .publish_body(topic, &correlation_id, request)
            .await?;
        Ok(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            OrchestratorError::BreakerOpen {
                breaker: "producer".to_string()
            }
            .is_retryable()
        );
        assert!(
            OrchestratorError::Timeout {
                correlation_id: CorrelationId::from_wire("c"),
                deadline: Duration::from_secs(5),
            }
            .is_retryable()
        );
        assert!(OrchestratorError::Store(StoreError::Connection("down".into())).is_retryable());
        assert!(!OrchestratorError::Decode(DecodeError::NotAnObject).is_retryable());
        assert!(!OrchestratorError::Encode(EncodeError("scalar".into())).is_retryable());
    }

    #[test]
    fn publish_errors_map_verbatim() {
        let broker = BrokerError::PublishFailed {
            topic: "t".into(),
            reason: "down".into(),
        };
        assert_eq!(
            OrchestratorError::from(PublishError::Broker(broker.clone())),
            OrchestratorError::Publish(broker)
        );
        assert_eq!(
            OrchestratorError::from(PublishError::BreakerOpen {
                breaker: "producer".into(),
                topic: "t".into(),
            }),
            OrchestratorError::BreakerOpen {
                breaker: "producer".into()
            }
        );
    }
}
