//! Redpanda message broker for relay request/reply.
//!
//! This crate provides a Kafka-protocol implementation of the [`MessageBroker`]
//! trait from `relay-core`, built on rdkafka. Any Kafka-compatible system works:
//! Redpanda, Apache Kafka, AWS MSK, and so on.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  publish(topic, correlation_id, json)  ┌──────────────┐
//! │ Orchestrator │ ─────────────────────────────────────▶ │   Redpanda   │
//! └──────────────┘                                        └──────┬───────┘
//!                                                                │ one StreamConsumer
//!                                                                │ per (topic, group)
//!                                                                ▼
//!                                                        ┌──────────────┐
//!                                                        │ Dispatch loop│
//!                                                        └──────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - A subscription has at most one message in flight. Its offset is committed
//!   when the subscriber polls the stream for the next item, which the dispatch
//!   loop does only after it has handled the current one
//! - If the stream is dropped or the process crashes before that, the message is
//!   redelivered to the group
//! - There is no dedup: a redelivered request is handled again
//! - Ordering is guaranteed within a partition; the correlation identifier is the
//!   message key, so one exchange always stays on one partition
//!
//! **Configuration options**:
//! - `auto_offset_reset`: where new groups start reading (default: "earliest")
//!
//! # Example
//!
//! ```no_run
//! use relay_core::MessageBroker;
//! use relay_redpanda::RedpandaBroker;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::new("localhost:9092")?;
//!
//! broker
//!     .publish("store-validation-request", "c-1", br#"{"correlation_id":"c-1","store_id":5,"user_id":9}"#)
//!     .await?;
//!
//! let mut stream = broker.subscribe("store-validation-request", "store-service").await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(message) => println!("{}: {} bytes", message.key, message.payload.len()),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use relay_core::{BrokerError, BrokerMessage, MessageBroker, MessageStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Kafka-protocol [`MessageBroker`].
///
/// One shared [`FutureProducer`] serves every publish (it is safe for
/// concurrent use); every `subscribe` creates its own [`StreamConsumer`] in the
/// requested group.
///
/// # Example
///
/// ```no_run
/// use relay_redpanda::RedpandaBroker;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let broker = RedpandaBroker::new("localhost:9092")?;
///
/// // Custom configuration
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")  // Wait for all replicas
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBroker {
    /// Kafka producer for publishing
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaBroker {
    /// Create a broker client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBrokerBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the auto offset reset policy for new consumer groups.
    ///
    /// - `"earliest"` (default): Start from the beginning of the topic, so a
    ///   request published before its responder group first joins is still seen
    /// - `"latest"`: Start from the end (only new messages)
    /// - `"error"`: Fail if no committed offset exists
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout,
            auto_offset_reset,
        })
    }
}

/// Copy a Kafka message into an owned [`BrokerMessage`].
///
/// A missing key becomes the empty string; a missing payload becomes empty
/// bytes, which the dispatch loop rejects as malformed.
fn to_broker_message(message: &BorrowedMessage<'_>) -> BrokerMessage {
    let key = message
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default();
    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
    BrokerMessage::new(message.topic(), key, payload)
}

/// Where a consumed message sits in its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

impl Position {
    fn of(message: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        }
    }

    /// Offsets to commit once this message is handled: the next one to read.
    fn commit_list(&self) -> KafkaResult<TopicPartitionList> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))?;
        Ok(list)
    }
}

/// Commit a handled message. Failures only widen the redelivery window.
fn commit(consumer: &StreamConsumer, position: &Position) {
    let result = position
        .commit_list()
        .and_then(|list| consumer.commit(&list, CommitMode::Async));
    if let Err(e) = result {
        tracing::warn!(
            topic = %position.topic,
            partition = position.partition,
            offset = position.offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

impl MessageBroker for RedpandaBroker {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::trace!(
                        topic = %topic,
                        key = %key,
                        partition,
                        offset,
                        "Message delivered"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => Err(BrokerError::PublishFailed {
                    topic,
                    reason: kafka_error.to_string(),
                }),
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let group = group.to_string();
        let brokers = self.brokers.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let subscription_failed = |reason: String| BrokerError::SubscriptionFailed {
                topic: topic.clone(),
                group: group.clone(),
                reason,
            };

            // Manual commit for at-least-once
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| subscription_failed(format!("Failed to subscribe: {e}")))?;

            tracing::info!(
                topic = %topic,
                group = %group,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            // The stream owns the consumer. The previous message is committed
            // only when the subscriber asks for the next one; dropping the stream
            // leaves the in-flight message uncommitted for redelivery.
            let stream = async_stream::stream! {
                let mut in_flight: Option<Position> = None;
                loop {
                    if let Some(handled) = in_flight.take() {
                        commit(&consumer, &handled);
                    }

                    let received = consumer
                        .recv()
                        .await
                        .map(|message| (Position::of(&message), to_broker_message(&message)));

                    match received {
                        Ok((position, message)) => {
                            in_flight = Some(position);
                            yield Ok(message);
                        }
                        Err(e) => {
                            yield Err(BrokerError::ReadFailed(format!("Failed to receive message: {e}")));
                        }
                    }
                }
                // Edition 2024 never-type fallback: pin the block's output to `()`.
                #[allow(unreachable_code)]
                ()
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBroker>();
        assert_sync::<RedpandaBroker>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaBroker::builder().build();
        assert!(matches!(result, Err(BrokerError::ConnectionFailed(_))));
    }

    #[test]
    fn build_does_not_need_a_reachable_broker() {
        // librdkafka connects lazily.
        let result = RedpandaBroker::builder().brokers("127.0.0.1:1").build();
        assert!(result.is_ok());
    }

    #[test]
    fn handled_message_commits_the_following_offset() {
        let position = Position {
            topic: "products-request".to_string(),
            partition: 2,
            offset: 41,
        };

        let list = position.commit_list().map_err(|e| e.to_string());
        let offset = list
            .as_ref()
            .ok()
            .and_then(|list| list.find_partition("products-request", 2))
            .map(|element| element.offset());

        assert_eq!(offset, Some(Offset::Offset(42)));
        assert_eq!(list.map(|list| list.count()), Ok(1));
    }
}
