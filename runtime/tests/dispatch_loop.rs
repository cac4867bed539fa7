//! Consumer dispatch loop behavior against the in-memory broker.

#![allow(clippy::unwrap_used, clippy::panic)]

use async_trait::async_trait;
use relay_core::{
    CorrelationId, DecodeError, Envelope, FromEnvelope, MessageBroker, RendezvousStore,
    response_key,
};
use relay_runtime::backoff::Backoff;
use relay_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, State};
use relay_runtime::dispatch::{
    ConsumerDispatchLoop, Delegate, Delegating, DispatchError, DispatchStats, MessageHandler,
    Reply, Terminal,
};
use relay_runtime::publisher::GuardedPublisher;
use relay_testing::{InMemoryBroker, InMemoryRendezvousStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const TOPIC: &str = "work";
const GROUP: &str = "workers";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Job {
    name: String,
}

impl FromEnvelope for Job {
    fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        Ok(Self {
            name: envelope.string_field("name")?.to_string(),
        })
    }
}

/// Records job names; fails the first `failures` calls.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl Recorder {
    fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let job: Job = envelope.decode()?;
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DispatchError::Handler(format!("cannot process {}", job.name)));
        }
        self.seen.lock().unwrap().push(job.name);
        Ok(())
    }
}

async fn publish_job(broker: &InMemoryBroker, name: &str) {
    let envelope = Envelope::wrap(&CorrelationId::new(), &Job { name: name.to_string() }).unwrap();
    broker
        .publish(TOPIC, envelope.correlation_id().as_str(), &envelope.to_bytes())
        .await
        .unwrap();
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

struct Running {
    stats: Arc<DispatchStats>,
    shutdown: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), self.handle)
            .await
            .unwrap()
            .unwrap();
    }
}

fn start(consumer: ConsumerDispatchLoop) -> Running {
    relay_testing::init_test_tracing();
    let (shutdown, rx) = broadcast::channel(1);
    let stats = consumer.stats();
    let handle = consumer.spawn(rx);
    Running {
        stats,
        shutdown,
        handle,
    }
}

fn consumer(broker: &InMemoryBroker, handler: Arc<dyn MessageHandler>) -> ConsumerDispatchLoop {
    ConsumerDispatchLoop::new(
        "test",
        TOPIC,
        GROUP,
        Arc::new(broker.clone()) as Arc<dyn MessageBroker>,
        handler,
    )
}

#[tokio::test(start_paused = true)]
async fn malformed_messages_are_skipped_and_the_loop_continues() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(Recorder::default());

    broker.inject_raw(TOPIC, "k1", b"not json");
    broker.inject_raw(TOPIC, "k2", br#"{"name":"no id"}"#);
    broker.inject_raw(TOPIC, "k3", br#"{"correlation_id":"c3","name":7}"#);
    publish_job(&broker, "valid").await;

    let running = start(consumer(&broker, Arc::clone(&recorder) as Arc<dyn MessageHandler>));
    eventually(|| running.stats.handled() == 1).await;

    assert_eq!(recorder.seen(), vec!["valid".to_string()]);
    assert_eq!(running.stats.consumed(), 4);
    assert_eq!(running.stats.decode_errors(), 3);
    assert_eq!(running.stats.handler_errors(), 0);
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn handler_errors_skip_the_message() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(Recorder::failing(1));

    publish_job(&broker, "first").await;
    publish_job(&broker, "second").await;

    let running = start(consumer(&broker, Arc::clone(&recorder) as Arc<dyn MessageHandler>));
    eventually(|| running.stats.handled() == 1).await;

    assert_eq!(recorder.seen(), vec!["second".to_string()]);
    assert_eq!(running.stats.handler_errors(), 1);
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn read_errors_do_not_stop_the_loop() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(Recorder::default());

    broker.inject_read_error(TOPIC, "partition leader moved");
    publish_job(&broker, "after").await;

    let running = start(consumer(&broker, Arc::clone(&recorder) as Arc<dyn MessageHandler>));
    eventually(|| running.stats.handled() == 1).await;

    assert_eq!(running.stats.read_errors(), 1);
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_exponentially() {
    let broker = InMemoryBroker::new();
    for _ in 0..3 {
        broker.inject_raw(TOPIC, "k", b"garbage");
    }
    publish_job(&broker, "valid").await;

    let recorder = Arc::new(Recorder::default());
    let backoff = Backoff::builder()
        .initial_delay(Duration::from_millis(100))
        .max_delay(Duration::from_secs(10))
        .build();

    let start_at = tokio::time::Instant::now();
    let running = start(
        consumer(&broker, Arc::clone(&recorder) as Arc<dyn MessageHandler>).with_backoff(backoff),
    );
    eventually(|| running.stats.handled() == 1).await;

    // 100 + 200 + 400ms of backoff before the valid message is reached.
    assert!(start_at.elapsed() >= Duration::from_millis(700));
    assert!(start_at.elapsed() < Duration::from_millis(800));
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn open_breaker_holds_messages_until_it_recovers() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(Recorder::failing(2));
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .name("dispatch")
            .failure_threshold(2)
            .max_requests(1)
            .timeout(Duration::from_secs(1))
            .build(),
    );

    publish_job(&broker, "a").await;
    publish_job(&broker, "b").await;
    publish_job(&broker, "c").await;

    let running = start(
        consumer(&broker, Arc::clone(&recorder) as Arc<dyn MessageHandler>)
            .with_breaker(breaker.clone()),
    );
    eventually(|| running.stats.handled() == 1).await;

    assert_eq!(recorder.seen(), vec!["c".to_string()]);
    assert_eq!(running.stats.handler_errors(), 2);
    assert!(running.stats.held() >= 1);
    // Held attempts never reach the handler.
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.state(), State::Closed);
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn decode_errors_do_not_trip_the_breaker() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(Recorder::default());
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::builder().failure_threshold(1).build(),
    );

    broker.inject_raw(TOPIC, "k", br#"{"correlation_id":"c","name":false}"#);
    publish_job(&broker, "ok").await;

    let running = start(
        consumer(&broker, Arc::clone(&recorder) as Arc<dyn MessageHandler>)
            .with_breaker(breaker.clone()),
    );
    eventually(|| running.stats.handled() == 1).await;

    assert_eq!(running.stats.decode_errors(), 1);
    assert_eq!(running.stats.held(), 0);
    assert_eq!(breaker.state(), State::Closed);
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn resubscribes_after_stream_end_without_losing_messages() {
    let broker = InMemoryBroker::new();
    let recorder = Arc::new(Recorder::default());

    publish_job(&broker, "before").await;
    let running = start(consumer(&broker, Arc::clone(&recorder) as Arc<dyn MessageHandler>));
    eventually(|| running.stats.handled() == 1).await;

    broker.close_subscriptions(TOPIC);
    publish_job(&broker, "after").await;
    eventually(|| running.stats.handled() == 2).await;

    assert_eq!(recorder.seen(), vec!["before".to_string(), "after".to_string()]);
    assert_eq!(broker.subscriptions(), 2);
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn retries_failed_subscribes() {
    let broker = InMemoryBroker::new();
    broker.fail_next_subscribes(3);
    publish_job(&broker, "eventually").await;

    let recorder = Arc::new(Recorder::default());
    let running = start(consumer(&broker, Arc::clone(&recorder) as Arc<dyn MessageHandler>));
    eventually(|| running.stats.handled() == 1).await;

    assert_eq!(broker.subscriptions(), 1);
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_an_idle_loop() {
    let broker = InMemoryBroker::new();
    let running = start(consumer(&broker, Arc::new(Recorder::default())));
    tokio::time::sleep(Duration::from_millis(50)).await;
    running.stop().await;
}

#[tokio::test(start_paused = true)]
async fn terminal_stores_decoded_answer_under_response_key() {
    let broker = InMemoryBroker::new();
    let store = Arc::new(InMemoryRendezvousStore::new());
    let terminal: Terminal<Job> = Terminal::new(
        Arc::clone(&store) as Arc<dyn RendezvousStore>,
        Duration::from_secs(10),
    );

    broker.inject_raw(TOPIC, "bad", br#"{"correlation_id":"bad","name":1}"#);
    broker.inject_raw(TOPIC, "good", br#"{"correlation_id":"good","name":"done"}"#);

    let running = start(consumer(&broker, Arc::new(terminal)));
    eventually(|| running.stats.handled() == 1).await;

    let stored = store
        .get(&response_key(&CorrelationId::from_wire("good")))
        .await
        .unwrap()
        .unwrap();
    let job: Job = serde_json::from_slice(&stored).unwrap();
    assert_eq!(job.name, "done");
    assert!(!store.contains_key(&response_key(&CorrelationId::from_wire("bad"))));
    running.stop().await;
}

struct Shout;

#[async_trait]
impl Delegate for Shout {
    type Request = Job;

    async fn respond(
        &self,
        _correlation_id: &CorrelationId,
        request: Job,
    ) -> Result<Option<Reply>, DispatchError> {
        if request.name.is_empty() {
            return Ok(None);
        }
        let reply = Reply::new("shouted", &json!({ "name": request.name.to_uppercase() }))?;
        Ok(Some(reply))
    }
}

#[tokio::test(start_paused = true)]
async fn delegating_publishes_under_the_same_correlation_id() {
    let broker = InMemoryBroker::new();
    let publisher = GuardedPublisher::new(
        Arc::new(broker.clone()) as Arc<dyn MessageBroker>,
        CircuitBreaker::new(CircuitBreakerConfig::builder().name("producer").build()),
    );

    broker.inject_raw(TOPIC, "c-1", br#"{"correlation_id":"c-1","name":"hello"}"#);
    broker.inject_raw(TOPIC, "c-2", br#"{"correlation_id":"c-2","name":""}"#);

    let running = start(consumer(&broker, Arc::new(Delegating::new(Shout, publisher))));
    eventually(|| running.stats.handled() == 2).await;

    let shouted = broker.published("shouted");
    assert_eq!(shouted.len(), 1);
    assert_eq!(shouted[0].key, "c-1");
    let envelope = Envelope::from_slice(&shouted[0].payload).unwrap();
    assert_eq!(envelope.correlation_id().as_str(), "c-1");
    assert_eq!(envelope.string_field("name").unwrap(), "HELLO");
    running.stop().await;
}
