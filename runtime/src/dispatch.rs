//! Consumer dispatch loop with automatic resubscription.
//!
//! A [`ConsumerDispatchLoop`] owns one `(topic, group)` subscription and runs
//! until shutdown. For each message it decodes the [`Envelope`] and hands it to
//! exactly one [`MessageHandler`]. Two handler shapes cover the protocol:
//!
//! - [`Terminal`]: ends an exchange by writing the decoded answer to the
//!   rendezvous store under `response:<correlation_id>`
//! - [`Delegating`]: computes an answer through a [`Delegate`] and publishes it
//!   onward, under the same correlation identifier
//!
//! # Pattern: Subscribe-Process-Resubscribe Loop
//!
//! ```text
//! loop {
//!     subscribe (backoff on failure)
//!     loop {
//!         next message:
//!             - decode envelope      (malformed: log, skip, back off)
//!             - dispatch via breaker (error: log, skip, back off)
//!                                    (breaker open: hold, back off, retry)
//!             - success resets the backoff
//!         stream ended: back off, resubscribe
//!     }
//! }
//! ```
//!
//! A malformed or failing message never stops the loop. Only the shutdown
//! signal does.
//!
//! # Delivery
//!
//! Delivery is at-least-once and there is no dedup table: a redelivered message
//! runs its handler again. Terminal writes are overwrites and therefore
//! harmless; delegates with side effects (notification dispatch) are not
//! idempotent.

use crate::backoff::{Backoff, BackoffTracker};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::publisher::{GuardedPublisher, PublishError};
use async_trait::async_trait;
use futures::StreamExt;
use relay_core::{
    BrokerMessage, CorrelationId, DecodeError, EncodeError, Envelope, FromEnvelope, MessageBroker,
    RendezvousStore, StoreError, response_key,
};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Errors a handler can report for one message.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A field the handler needs is missing or mistyped; the message is skipped
    /// and does not count toward the breaker's failure budget
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Forwarding the answer failed
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Writing the answer to the rendezvous store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The answer could not be serialized
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// A collaborator of the handler failed (repository, mailer, ...)
    #[error("Handler failed: {0}")]
    Handler(String),
}

/// Processes one decoded envelope.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`]; the loop logs it and moves on.
    async fn handle(&self, envelope: &Envelope) -> Result<(), DispatchError>;
}

/// Terminal consumer: stash the decoded answer in the rendezvous store.
///
/// The answer is decoded as `R` first, so a structurally invalid response is
/// rejected here rather than handed to a waiter.
pub struct Terminal<R> {
    store: Arc<dyn RendezvousStore>,
    ttl: Duration,
    _answer: PhantomData<fn() -> R>,
}

impl<R> Terminal<R>
where
    R: FromEnvelope + Serialize,
{
    /// Create a terminal writing answers with the given TTL.
    #[must_use]
    pub fn new(store: Arc<dyn RendezvousStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            _answer: PhantomData,
        }
    }

    /// Write an already-decoded answer under `response:<correlation_id>`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Encode`] if `answer` cannot be serialized,
    /// [`DispatchError::Store`] if the write fails.
    pub async fn store_answer(
        &self,
        correlation_id: &CorrelationId,
        answer: &R,
    ) -> Result<(), DispatchError> {
        let bytes = serde_json::to_vec(answer).map_err(|e| EncodeError(e.to_string()))?;
        let key = response_key(correlation_id);

        self.store.put(&key, &bytes, self.ttl).await?;

        metrics::counter!("relay_rendezvous_writes_total").increment(1);
        debug!(correlation_id = %correlation_id, ttl_ms = self.ttl.as_millis(), "Stored answer");
        Ok(())
    }
}

#[async_trait]
impl<R> MessageHandler for Terminal<R>
where
    R: FromEnvelope + Serialize + Send + Sync + 'static,
{
    async fn handle(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        let answer: R = envelope.decode()?;
        self.store_answer(envelope.correlation_id(), &answer).await
    }
}

/// An outbound message produced by a [`Delegate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Destination topic
    pub topic: String,
    /// Message body; must be a JSON object
    pub body: serde_json::Value,
}

impl Reply {
    /// Build a reply from any serializable body.
    ///
    /// # Errors
    ///
    /// [`EncodeError`] if the body cannot be serialized.
    pub fn new<T: Serialize>(topic: impl Into<String>, body: &T) -> Result<Self, EncodeError> {
        Ok(Self {
            topic: topic.into(),
            body: serde_json::to_value(body).map_err(|e| EncodeError(e.to_string()))?,
        })
    }
}

/// Business step of a delegating consumer.
#[async_trait]
pub trait Delegate: Send + Sync {
    /// Message type decoded from the incoming envelope.
    type Request: FromEnvelope + Send + 'static;

    /// Compute the onward message, if any.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Handler`] when a collaborator fails.
    async fn respond(
        &self,
        correlation_id: &CorrelationId,
        request: Self::Request,
    ) -> Result<Option<Reply>, DispatchError>;
}

/// Delegating consumer: decode, compute through a [`Delegate`], publish onward.
pub struct Delegating<D> {
    delegate: D,
    publisher: GuardedPublisher,
}

impl<D: Delegate> Delegating<D> {
    /// Create a delegating handler publishing through `publisher`.
    #[must_use]
    pub const fn new(delegate: D, publisher: GuardedPublisher) -> Self {
        Self {
            delegate,
            publisher,
        }
    }
}

#[async_trait]
impl<D: Delegate> MessageHandler for Delegating<D> {
    async fn handle(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        let request: D::Request = envelope.decode()?;
        let correlation_id = envelope.correlation_id();

        if let Some(reply) = self.delegate.respond(correlation_id, request).await? {
            let outbound = Envelope::wrap(correlation_id, &reply.body)?;
            self.publisher.publish(&reply.topic, &outbound).await?;
        }
        Ok(())
    }
}

/// Per-loop counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    consumed: AtomicU64,
    handled: AtomicU64,
    decode_errors: AtomicU64,
    handler_errors: AtomicU64,
    read_errors: AtomicU64,
    held: AtomicU64,
}

impl DispatchStats {
    /// Messages pulled from the subscription.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// Messages handled successfully.
    #[must_use]
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Messages skipped as malformed.
    #[must_use]
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Messages skipped because the handler failed.
    #[must_use]
    pub fn handler_errors(&self) -> u64 {
        self.handler_errors.load(Ordering::Relaxed)
    }

    /// Transport read errors.
    #[must_use]
    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    /// Dispatch attempts deferred because the breaker was open.
    #[must_use]
    pub fn held(&self) -> u64 {
        self.held.load(Ordering::Relaxed)
    }
}

enum Outcome {
    Handled,
    Malformed(DecodeError),
    Failed(DispatchError),
    Held,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Long-lived consumer for one `(topic, group)` subscription.
pub struct ConsumerDispatchLoop {
    name: String,
    topic: String,
    group: String,
    broker: Arc<dyn MessageBroker>,
    handler: Arc<dyn MessageHandler>,
    breaker: Option<CircuitBreaker>,
    backoff: Backoff,
    stats: Arc<DispatchStats>,
}

impl ConsumerDispatchLoop {
    /// Create a loop with the default backoff and no breaker.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        group: impl Into<String>,
        broker: Arc<dyn MessageBroker>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            group: group.into(),
            broker,
            handler,
            breaker: None,
            backoff: Backoff::default(),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Wrap every dispatch in `breaker`.
    ///
    /// Use a breaker distinct from the publisher's: a delegating handler
    /// publishes through its own breaker while the dispatch is in flight.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Replace the backoff policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Counters, shared with the running loop.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the loop as a background task that runs until `shutdown` fires.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run the loop on the current task until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(consumer = %self.name, topic = %self.topic, group = %self.group, "Consumer loop started");
        let mut backoff = self.backoff.tracker();

        'subscription: loop {
            let subscribed = tokio::select! {
                _ = shutdown.recv() => break 'subscription,
                result = self.broker.subscribe(&self.topic, &self.group) => result,
            };

            let mut stream = match subscribed {
                Ok(stream) => {
                    info!(consumer = %self.name, topic = %self.topic, group = %self.group, "Subscribed");
                    stream
                }
                Err(e) => {
                    error!(consumer = %self.name, topic = %self.topic, error = %e, "Subscribe failed");
                    if pause(backoff.on_failure(), &mut shutdown).await == Flow::Stop {
                        break 'subscription;
                    }
                    continue 'subscription;
                }
            };

            loop {
                let next = tokio::select! {
                    _ = shutdown.recv() => break 'subscription,
                    next = stream.next() => next,
                };

                let flow = match next {
                    Some(Ok(message)) => {
                        self.process(message, &mut backoff, &mut shutdown).await
                    }
                    Some(Err(e)) => {
                        self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(consumer = %self.name, topic = %self.topic, error = %e, "Read error");
                        pause(backoff.on_failure(), &mut shutdown).await
                    }
                    None => {
                        warn!(consumer = %self.name, topic = %self.topic, "Stream ended, resubscribing");
                        if pause(backoff.on_failure(), &mut shutdown).await == Flow::Stop {
                            break 'subscription;
                        }
                        continue 'subscription;
                    }
                };

                if flow == Flow::Stop {
                    break 'subscription;
                }
            }
        }

        info!(consumer = %self.name, topic = %self.topic, "Consumer loop stopped");
    }

    async fn process(
        &self,
        message: BrokerMessage,
        backoff: &mut BackoffTracker,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Flow {
        self.stats.consumed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay_messages_consumed_total", "topic" => self.topic.clone()).increment(1);

        let envelope = match Envelope::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.record_malformed(&message.key, &e);
                return pause(backoff.on_failure(), shutdown).await;
            }
        };

        loop {
            match self.dispatch(&envelope).await {
                Outcome::Handled => {
                    backoff.on_success();
                    self.stats.handled.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        consumer = %self.name,
                        topic = %self.topic,
                        correlation_id = %envelope.correlation_id(),
                        "Handled message"
                    );
                    return Flow::Continue;
                }
                Outcome::Malformed(e) => {
                    self.record_malformed(envelope.correlation_id().as_str(), &e);
                    return pause(backoff.on_failure(), shutdown).await;
                }
                Outcome::Failed(e) => {
                    self.stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("relay_handler_errors_total", "topic" => self.topic.clone())
                        .increment(1);
                    error!(
                        consumer = %self.name,
                        topic = %self.topic,
                        correlation_id = %envelope.correlation_id(),
                        error = %e,
                        "Handler failed, skipping message"
                    );
                    return pause(backoff.on_failure(), shutdown).await;
                }
                Outcome::Held => {
                    self.stats.held.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        consumer = %self.name,
                        topic = %self.topic,
                        correlation_id = %envelope.correlation_id(),
                        "Breaker open, holding message"
                    );
                    if pause(backoff.on_failure(), shutdown).await == Flow::Stop {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, envelope: &Envelope) -> Outcome {
        // Decode errors are the message's fault, not the dependency's, so they
        // are carried through the breaker as a success.
        let attempt = || async {
            match self.handler.handle(envelope).await {
                Ok(()) => Ok(Ok(())),
                Err(DispatchError::Decode(e)) => Ok(Err(e)),
                Err(e) => Err(e),
            }
        };

        let result = match &self.breaker {
            Some(breaker) => breaker.execute(attempt).await,
            None => attempt().await.map_err(CircuitBreakerError::Inner),
        };

        match result {
            Ok(Ok(())) => Outcome::Handled,
            Ok(Err(e)) => Outcome::Malformed(e),
            Err(CircuitBreakerError::Inner(e)) => Outcome::Failed(e),
            Err(CircuitBreakerError::Open | CircuitBreakerError::TooManyRequests) => Outcome::Held,
        }
    }

    fn record_malformed(&self, key: &str, error: &DecodeError) {
        self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay_decode_errors_total", "topic" => self.topic.clone()).increment(1);
        warn!(
            consumer = %self.name,
            topic = %self.topic,
            key,
            error = %error,
            "Malformed message, skipping"
        );
    }
}

impl std::fmt::Debug for ConsumerDispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerDispatchLoop")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Sleep for `delay` unless shutdown fires first.
async fn pause(delay: Duration, shutdown: &mut broadcast::Receiver<()>) -> Flow {
    tokio::select! {
        _ = shutdown.recv() => Flow::Stop,
        () = tokio::time::sleep(delay) => Flow::Continue,
    }
}
