//! Timing properties of the correlation waiter, asserted with paused time.

#![allow(clippy::unwrap_used)]

use relay_core::{CorrelationId, DecodeError, RendezvousStore, StoreError, response_key};
use relay_runtime::waiter::{CorrelationWaiter, WaitError, WaiterConfig};
use relay_testing::InMemoryRendezvousStore;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Deserialize, PartialEq)]
struct Validity {
    is_valid: bool,
}

fn waiter(store: &Arc<InMemoryRendezvousStore>, config: WaiterConfig) -> CorrelationWaiter {
    CorrelationWaiter::new(Arc::clone(store) as Arc<dyn RendezvousStore>, config)
}

#[tokio::test(start_paused = true)]
async fn timeout_lands_between_deadline_and_one_poll_later() {
    let store = Arc::new(InMemoryRendezvousStore::new());
    let waiter = waiter(&store, WaiterConfig::default());

    let start = Instant::now();
    let result = waiter.await_answer::<Validity>(&CorrelationId::new()).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(WaitError::Timeout { .. })));
    assert!(elapsed >= Duration::from_secs(5), "returned early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(5_100), "returned late: {elapsed:?}");
    // One read at t=0 and one per 100ms tick up to and including the deadline.
    assert_eq!(store.get_count(), 51);
}

#[tokio::test(start_paused = true)]
async fn timeout_bound_holds_when_interval_does_not_divide_deadline() {
    let store = Arc::new(InMemoryRendezvousStore::new());
    let config = WaiterConfig::default()
        .with_poll_interval(Duration::from_millis(300))
        .with_deadline(Duration::from_millis(1_000));
    let waiter = waiter(&store, config);

    let start = Instant::now();
    let result = waiter.await_answer::<Validity>(&CorrelationId::new()).await;

    assert!(matches!(result, Err(WaitError::Timeout { .. })));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1_000));
    assert!(elapsed <= Duration::from_millis(1_300));
}

#[tokio::test(start_paused = true)]
async fn answer_is_returned_on_the_next_poll() {
    let store = Arc::new(InMemoryRendezvousStore::new());
    let waiter = waiter(&store, WaiterConfig::default());
    let id = CorrelationId::new();

    let writer = Arc::clone(&store);
    let key = response_key(&id);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1_234)).await;
        writer
            .put(&key, br#"{"is_valid":false}"#, Duration::from_secs(10))
            .await
            .unwrap();
    });

    let start = Instant::now();
    let answer: Validity = waiter.await_answer(&id).await.unwrap();

    assert_eq!(answer, Validity { is_valid: false });
    assert_eq!(start.elapsed(), Duration::from_millis(1_300));
}

#[tokio::test(start_paused = true)]
async fn mismatched_answer_is_a_decode_error() {
    let store = Arc::new(InMemoryRendezvousStore::new());
    let id = CorrelationId::new();
    store
        .put(&response_key(&id), br#"{"is_valid":"maybe"}"#, Duration::from_secs(10))
        .await
        .unwrap();

    let result = waiter(&store, WaiterConfig::default())
        .await_answer::<Validity>(&id)
        .await;

    assert!(matches!(
        result,
        Err(WaitError::Decode(DecodeError::InvalidAnswer(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn store_failure_is_surfaced_not_retried() {
    let store = Arc::new(InMemoryRendezvousStore::new());
    store.set_failing(true);

    let result = waiter(&store, WaiterConfig::default())
        .await_answer::<Validity>(&CorrelationId::new())
        .await;

    assert!(matches!(result, Err(WaitError::Store(StoreError::Connection(_)))));
    assert_eq!(store.get_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn answers_written_with_ttl_at_least_deadline_are_always_observed() {
    let store = Arc::new(InMemoryRendezvousStore::new());
    let waiter = waiter(&store, WaiterConfig::default());

    for offset_ms in [0, 1, 99, 100, 2_500, 4_900, 4_999] {
        let id = CorrelationId::new();
        let writer = Arc::clone(&store);
        let key = response_key(&id);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(offset_ms)).await;
            writer
                .put(&key, br#"{"is_valid":true}"#, Duration::from_secs(10))
                .await
                .unwrap();
        });

        let answer: Validity = waiter.await_answer(&id).await.unwrap();
        assert!(answer.is_valid, "missed answer written at {offset_ms}ms");
    }
}

#[tokio::test(start_paused = true)]
async fn ttl_shorter_than_deadline_can_time_out_although_an_answer_existed() {
    // Expected behavior when the waiter deadline exceeds the writer TTL: the
    // entry lives between two polls and the call times out.
    let store = Arc::new(InMemoryRendezvousStore::new());
    let config = WaiterConfig::default()
        .with_poll_interval(Duration::from_secs(2))
        .with_deadline(Duration::from_secs(5));
    let waiter = waiter(&store, config);
    let id = CorrelationId::new();

    let writer = Arc::clone(&store);
    let key = response_key(&id);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        writer
            .put(&key, br#"{"is_valid":true}"#, Duration::from_secs(1))
            .await
            .unwrap();
    });

    let result = waiter.await_answer::<Validity>(&id).await;

    assert!(matches!(result, Err(WaitError::Timeout { .. })));
    assert_eq!(store.put_count(), 1);
}
