//! Integration tests for [`RedpandaBroker`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Publish/subscribe round-trip with the correlation id as message key
//! - Separate consumer groups each receive every message
//! - A message is committed only once the next one is requested, so an
//!   unhandled message is redelivered to its group
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p relay-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use relay_core::{BrokerMessage, MessageBroker, MessageStream};
use relay_redpanda::RedpandaBroker;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn broker(brokers: &str) -> RedpandaBroker {
    RedpandaBroker::builder()
        .brokers(brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create broker")
}

/// Publish until the topic exists and metadata has propagated.
async fn ensure_topic_exists(broker: &RedpandaBroker, topic: &str) {
    for attempt in 1..=60 {
        if broker.publish(topic, "warmup", b"{}").await.is_ok() {
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

/// Receive `count` non-warmup messages or panic after 20 seconds.
async fn receive(stream: &mut MessageStream, count: usize) -> Vec<BrokerMessage> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(20), async {
        while received.len() < count {
            match stream.next().await {
                Some(Ok(message)) if message.key != "warmup" => received.push(message),
                Some(_) => {}
                None => panic!("Stream ended unexpectedly"),
            }
        }
    })
    .await
    .expect("Timed out waiting for messages");
    received
}

#[tokio::test]
#[ignore]
async fn publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = broker(&brokers);
    ensure_topic_exists(&broker, "store-validation-request").await;

    let mut stream = broker
        .subscribe("store-validation-request", "store-service")
        .await
        .expect("Failed to subscribe");

    broker
        .publish(
            "store-validation-request",
            "c-1",
            br#"{"correlation_id":"c-1","store_id":5,"user_id":9}"#,
        )
        .await
        .expect("Failed to publish");

    let received = receive(&mut stream, 1).await;
    assert_eq!(received[0].key, "c-1");
    assert_eq!(received[0].topic, "store-validation-request");
    assert_eq!(
        received[0].payload,
        br#"{"correlation_id":"c-1","store_id":5,"user_id":9}"#
    );
}

#[tokio::test]
#[ignore]
async fn every_group_sees_every_message() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = broker(&brokers);
    ensure_topic_exists(&broker, "product-validation-response").await;

    let mut cart = broker
        .subscribe("product-validation-response", "cart-service")
        .await
        .expect("Failed to subscribe");
    let mut audit = broker
        .subscribe("product-validation-response", "audit")
        .await
        .expect("Failed to subscribe");

    broker
        .publish("product-validation-response", "c-2", br#"{"correlation_id":"c-2"}"#)
        .await
        .expect("Failed to publish");

    assert_eq!(receive(&mut cart, 1).await[0].key, "c-2");
    assert_eq!(receive(&mut audit, 1).await[0].key, "c-2");
}

#[tokio::test]
#[ignore]
async fn unhandled_message_is_redelivered_to_its_group() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = broker(&brokers);
    ensure_topic_exists(&broker, "product-validation-request").await;

    {
        let mut stream = broker
            .subscribe("product-validation-request", "product-service")
            .await
            .expect("Failed to subscribe");
        broker
            .publish("product-validation-request", "only", br#"{"correlation_id":"only"}"#)
            .await
            .expect("Failed to publish");
        assert_eq!(receive(&mut stream, 1).await[0].key, "only");
        // Dropped without asking for another message: nothing is committed.
    }

    let mut stream = broker
        .subscribe("product-validation-request", "product-service")
        .await
        .expect("Failed to subscribe");
    assert_eq!(receive(&mut stream, 1).await[0].key, "only");
}

#[tokio::test]
#[ignore]
async fn requesting_the_next_message_commits_the_previous_one() {
    let (_kafka, brokers) = start_kafka().await;
    let broker = broker(&brokers);
    ensure_topic_exists(&broker, "products-request").await;

    {
        let mut stream = broker
            .subscribe("products-request", "product-service")
            .await
            .expect("Failed to subscribe");
        for key in ["first", "second"] {
            broker
                .publish("products-request", key, br#"{"correlation_id":"x"}"#)
                .await
                .expect("Failed to publish");
        }
        let keys: Vec<String> = receive(&mut stream, 2).await.into_iter().map(|m| m.key).collect();
        assert_eq!(keys, ["first", "second"]);
        // Let the async commit of "first" land before the consumer goes away.
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let mut stream = broker
        .subscribe("products-request", "product-service")
        .await
        .expect("Failed to subscribe");
    assert_eq!(receive(&mut stream, 1).await[0].key, "second");
}
