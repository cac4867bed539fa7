//! In-memory message broker.
//!
//! Each topic is an append-only log. Each `(topic, group)` pair owns one cursor
//! into that log, shared by every subscription of the group, so consumers in a
//! group split the messages and different groups each see all of them. A new
//! group starts at the beginning of the log, which lets a test publish before
//! the responder subscribes.
//!
//! Fault injection covers the failure modes the runtime must survive: failing
//! publishes, failing subscribes, read errors inside a stream, malformed payloads
//! and subscriptions that end.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_stream::stream;
use relay_core::{BrokerError, BrokerMessage, MessageBroker, MessageStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

type Entry = Result<BrokerMessage, BrokerError>;

#[derive(Default)]
struct TopicLog {
    entries: Vec<Entry>,
    cursors: HashMap<String, usize>,
    generation: u64,
}

#[derive(Default)]
struct Faults {
    failing_publishes: usize,
    publishes_always_fail: bool,
    failing_subscribes: usize,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    faults: Faults,
    publish_attempts: usize,
    subscriptions: usize,
}

/// In-memory [`MessageBroker`] for fast, deterministic tests.
///
/// Cloning shares the underlying logs.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publishes.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().unwrap().faults.failing_publishes = count;
    }

    /// Make every publish fail (or succeed again) until changed.
    pub fn set_publish_failing(&self, failing: bool) {
        self.state.lock().unwrap().faults.publishes_always_fail = failing;
    }

    /// Fail the next `count` subscribes.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.state.lock().unwrap().faults.failing_subscribes = count;
    }

    /// Append raw bytes to a topic, bypassing publish faults.
    ///
    /// Used to feed malformed payloads to consumers.
    pub fn inject_raw(&self, topic: &str, key: &str, payload: &[u8]) {
        self.append(topic, Ok(BrokerMessage::new(topic, key, payload.to_vec())));
    }

    /// Append a read error that every group of `topic` will observe once.
    pub fn inject_read_error(&self, topic: &str, reason: &str) {
        self.append(topic, Err(BrokerError::ReadFailed(reason.to_string())));
    }

    /// End every open subscription of `topic`; group cursors are kept.
    pub fn close_subscriptions(&self, topic: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.topics.entry(topic.to_string()).or_default().generation += 1;
        }
        self.notify.notify_waiters();
    }

    /// Messages successfully published (or injected) to `topic`, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<BrokerMessage> {
        self.state
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .map(|log| log.entries.iter().filter_map(|e| e.as_ref().ok().cloned()).collect())
            .unwrap_or_default()
    }

    /// Publish calls made, including failed ones.
    #[must_use]
    pub fn publish_attempts(&self) -> usize {
        self.state.lock().unwrap().publish_attempts
    }

    /// Subscriptions opened so far.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions
    }

    /// Messages of `topic` not yet taken by `group`.
    #[must_use]
    pub fn pending(&self, topic: &str, group: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.topics.get(topic).map_or(0, |log| {
            log.entries.len() - log.cursors.get(group).copied().unwrap_or(0)
        })
    }

    fn append(&self, topic: &str, entry: Entry) {
        {
            let mut state = self.state.lock().unwrap();
            state.topics.entry(topic.to_string()).or_default().entries.push(entry);
        }
        self.notify.notify_waiters();
    }

    fn take_next(&self, topic: &str, group: &str, generation: u64) -> Next {
        let mut state = self.state.lock().unwrap();
        let log = state.topics.entry(topic.to_string()).or_default();
        if log.generation != generation {
            return Next::Closed;
        }
        let cursor = log.cursors.entry(group.to_string()).or_insert(0);
        match log.entries.get(*cursor) {
            Some(entry) => {
                *cursor += 1;
                Next::Entry(entry.clone())
            }
            None => Next::Idle,
        }
    }
}

enum Next {
    Entry(Entry),
    Idle,
    Closed,
}

impl MessageBroker for InMemoryBroker {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = BrokerMessage::new(topic.clone(), key, payload.to_vec());

        Box::pin(async move {
            let failed = {
                let mut state = self.state.lock().unwrap();
                state.publish_attempts += 1;
                if state.faults.publishes_always_fail {
                    true
                } else if state.faults.failing_publishes > 0 {
                    state.faults.failing_publishes -= 1;
                    true
                } else {
                    false
                }
            };

            if failed {
                return Err(BrokerError::PublishFailed {
                    topic,
                    reason: "injected publish failure".to_string(),
                });
            }

            self.append(&topic, Ok(message));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        let group = group.to_string();

        Box::pin(async move {
            let generation = {
                let mut state = self.state.lock().unwrap();
                if state.faults.failing_subscribes > 0 {
                    state.faults.failing_subscribes -= 1;
                    return Err(BrokerError::SubscriptionFailed {
                        topic,
                        group,
                        reason: "injected subscribe failure".to_string(),
                    });
                }
                state.subscriptions += 1;
                state.topics.entry(topic.clone()).or_default().generation
            };

            let broker = self.clone();
            let stream = stream! {
                loop {
                    let notified = broker.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    match broker.take_next(&topic, &group, generation) {
                        Next::Entry(entry) => yield entry,
                        Next::Closed => break,
                        Next::Idle => notified.await,
                    }
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("InMemoryBroker")
            .field("topics", &state.topics.keys().collect::<Vec<_>>())
            .field("publish_attempts", &state.publish_attempts)
            .finish_non_exhaustive()
    }
}
