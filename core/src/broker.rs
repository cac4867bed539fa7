//! Message broker abstraction for cross-service requests.
//!
//! This module provides the [`MessageBroker`] trait: a thin publish/subscribe
//! contract over a Kafka-compatible transport. Every cross-service request and
//! every answer travels through it.
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a message may be delivered to a consumer group more than once
//! - **Ordered within partition**: messages published with the same key to the same
//!   topic are observed in publish order
//! - **No cross-topic ordering**: correlation identifiers, not ordering, tie a
//!   response to its request
//! - **No internal retry**: a failed publish surfaces as [`BrokerError`]; retry and
//!   load shedding belong to the caller (circuit breaker, orchestrator)
//!
//! # Subscriptions
//!
//! A subscription is one durable `(topic, group)` pair. Each consumer group sees
//! every message of the topic once (modulo redelivery); consumers sharing a group
//! split the work. The returned [`MessageStream`] is infinite and can only be
//! restarted by subscribing again.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_core::broker::MessageBroker;
//! use futures::StreamExt;
//!
//! async fn example(broker: impl MessageBroker) -> Result<(), relay_core::BrokerError> {
//!     broker.publish("store-validation-request", "corr-1", br#"{"correlation_id":"corr-1"}"#).await?;
//!
//!     let mut stream = broker.subscribe("store-validation-request", "store-service").await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(message) => println!("{} bytes under key {}", message.payload.len(), message.key),
//!             Err(e) => eprintln!("read error: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker or build a client
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}' (group '{group}'): {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The consumer group used
        group: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to read the next message from an open subscription
    #[error("Read failed: {0}")]
    ReadFailed(String),
}

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic the message was read from
    pub topic: String,
    /// Message key (the correlation identifier for request/reply traffic)
    pub key: String,
    /// Raw payload bytes (a JSON envelope for request/reply traffic)
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Create a new message.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
        }
    }
}

/// Stream of messages from a subscription.
///
/// Each item is either a message or a transport-level read error. A read error
/// does not end the stream; the stream ends only when the underlying
/// subscription is torn down.
///
/// Delivery is at-least-once. Requesting the next item acknowledges the
/// previous message, so a consumer must finish handling a message before it
/// polls again. A message yielded but not yet acknowledged when the stream is
/// dropped may be delivered again.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BrokerMessage, BrokerError>> + Send>>;

/// Publish/subscribe transport used by every request/reply participant.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the publish path is called
/// concurrently by many in-flight orchestrator calls and by consumer loops
/// forwarding answers.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn MessageBroker>`.
pub trait MessageBroker: Send + Sync {
    /// Publish `payload` to `topic` under the partition key `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker does not acknowledge
    /// the message. The client does not retry.
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Open a subscription for `(topic, group)`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the consumer cannot be
    /// created or the topic cannot be subscribed.
    fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>>;
}
