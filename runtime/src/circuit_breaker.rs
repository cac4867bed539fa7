//! Circuit breaker guarding outbound publishes and consumer dispatch.
//!
//! A circuit breaker watches a fallible dependency and "opens" (stops calling it)
//! once consecutive failures reach a threshold, so a broker or store outage sheds
//! load immediately instead of stacking up doomed calls.
//!
//! # States
//!
//! - **Closed**: calls pass through. Consecutive failures are counted; all counts
//!   are cleared every `interval` (a zero interval never clears them).
//! - **Open**: calls fail immediately with [`CircuitBreakerError::Open`] without
//!   running the operation, until `timeout` has elapsed.
//! - **HalfOpen**: up to `max_requests` trial calls are let through. Any failure
//!   reopens the circuit; `max_requests` consecutive successes close it. Calls
//!   beyond the probe budget fail with [`CircuitBreakerError::TooManyRequests`].
//!
//! Every state change bumps a generation counter. An outcome reported by a call
//! that started in an older generation is ignored, so a slow call that began
//! before the circuit opened cannot close it again.
//!
//! # Sharing
//!
//! One breaker guards one dependency (for example, every outbound publish of a
//! process, not one per topic). [`CircuitBreaker`] is `Clone`; clones share
//! state. It is constructed explicitly and injected into each component that
//! publishes, so tests can substitute or inspect it.
//!
//! # Example
//!
//! ```rust
//! use relay_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = CircuitBreakerConfig::builder()
//!     .name("producer")
//!     .failure_threshold(5)
//!     .max_requests(3)
//!     .interval(Duration::from_secs(20))
//!     .timeout(Duration::from_secs(5))
//!     .on_state_change(|name, from, to| println!("[{name}] {from} -> {to}"))
//!     .build();
//!
//! let breaker = CircuitBreaker::new(config);
//!
//! match breaker.execute(|| async { Ok::<_, String>(42) }).await {
//!     Ok(result) => println!("Success: {result}"),
//!     Err(e) => println!("Failed: {e}"),
//! }
//! # }
//! ```

use crate::HealthStatus;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Callback invoked on every state transition with `(breaker name, from, to)`.
pub type StateChangeHook = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Name used in logs, metrics and the state-change hook
    pub name: String,
    /// Consecutive failures in `Closed` that open the circuit
    pub failure_threshold: u32,
    /// Trial calls allowed in `HalfOpen`; this many consecutive successes close the circuit
    pub max_requests: u32,
    /// Period after which `Closed` counts are cleared (zero: never)
    pub interval: Duration,
    /// Cooldown spent in `Open` before moving to `HalfOpen`
    pub timeout: Duration,
    /// Observability hook called after each transition
    pub on_state_change: Option<StateChangeHook>,
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Default)]
pub struct CircuitBreakerConfigBuilder {
    name: Option<String>,
    failure_threshold: Option<u32>,
    max_requests: Option<u32>,
    interval: Option<Duration>,
    timeout: Option<Duration>,
    on_state_change: Option<StateChangeHook>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the breaker name (default: `"breaker"`).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the failure threshold (default: 5, minimum 1).
    ///
    /// Circuit opens after this many consecutive failures.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the half-open probe budget (default: 5, minimum 1).
    #[must_use]
    pub const fn max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = Some(max_requests);
        self
    }

    /// Set the closed-state reset interval (default: 30 seconds).
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the open-state cooldown (default: 5 seconds).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a state-change hook.
    ///
    /// The hook runs on the calling task after the breaker's lock is released;
    /// it should return quickly.
    #[must_use]
    pub fn on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: self.name.unwrap_or_else(|| "breaker".to_string()),
            failure_threshold: self.failure_threshold.unwrap_or(5).max(1),
            max_requests: self.max_requests.unwrap_or(5).max(1),
            interval: self.interval.unwrap_or(Duration::from_secs(30)),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            on_state_change: self.on_state_change,
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, testing if the dependency recovered
    HalfOpen,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(label)
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request rejected without running the operation
    #[error("Circuit breaker is open")]
    Open,
    /// Circuit is half-open and its probe budget is used up
    #[error("Circuit breaker is half-open and at its probe limit")]
    TooManyRequests,
    /// Operation ran and failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// `true` if the breaker refused to run the operation.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Open | Self::TooManyRequests)
    }

    /// Short label for a rejection, independent of the operation's error type.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::TooManyRequests => "probe limit",
            Self::Inner(_) => "operation failed",
        }
    }
}

/// Request counts for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Calls admitted in this generation
    pub requests: u32,
    /// Successful calls in this generation
    pub total_successes: u32,
    /// Failed calls in this generation
    pub total_failures: u32,
    /// Successes since the last failure
    pub consecutive_successes: u32,
    /// Failures since the last success
    pub consecutive_failures: u32,
}

impl Counts {
    const fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    const fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    const fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Internal state of the circuit breaker.
#[derive(Debug)]
struct BreakerState {
    state: State,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

type Transition = Option<(State, State)>;

/// Circuit breaker for preventing cascading failures.
///
/// Counters live behind a mutex that is never held across an `.await`, so all
/// updates are atomic with respect to concurrent callers.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
    // Metrics
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let expiry = (!config.interval.is_zero()).then(|| Instant::now() + config.interval);
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState {
                state: State::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state, applying any time-based transition that is due.
    #[must_use]
    pub fn state(&self) -> State {
        let (state, transition) = {
            let mut inner = self.lock();
            let transition = self.refresh(&mut inner, Instant::now());
            (inner.state, transition)
        };
        self.announce(transition);
        state
    }

    /// Counts of the current generation.
    #[must_use]
    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Map the current state to a health level.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        match self.state() {
            State::Closed => HealthStatus::Healthy,
            State::HalfOpen => HealthStatus::Degraded,
            State::Open => HealthStatus::Unhealthy,
        }
    }

    /// Run an operation through the circuit breaker.
    ///
    /// # Errors
    ///
    /// - [`CircuitBreakerError::Open`] if the circuit is open (operation not run)
    /// - [`CircuitBreakerError::TooManyRequests`] if the half-open budget is spent
    ///   (operation not run)
    /// - [`CircuitBreakerError::Inner`] if the operation ran and failed
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let (generation, admitted_in) = match self.before_call() {
            Ok(admitted) => admitted,
            Err(rejection) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("relay_breaker_rejections_total", "breaker" => self.config.name.clone())
                    .increment(1);
                tracing::warn!(breaker = %self.config.name, reason = rejection.reason(), "Circuit breaker rejected call");
                return Err(rejection);
            }
        };

        // A cancelled half-open probe counts as a failure so it cannot hold its
        // slot forever. A cancelled closed-state call is released uncounted.
        let mut attempt = Attempt {
            breaker: self,
            generation,
            probe: admitted_in == State::HalfOpen,
            settled: false,
        };

        let outcome = operation().await;
        attempt.settled = true;

        match outcome {
            Ok(result) => {
                self.after_call(generation, true);
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(err) => {
                self.after_call(generation, false);
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Admit or reject a call, returning its generation and the state it was admitted in.
    fn before_call<E>(&self) -> Result<(u64, State), CircuitBreakerError<E>> {
        let (admission, transition) = {
            let mut inner = self.lock();
            let transition = self.refresh(&mut inner, Instant::now());

            let admission = match inner.state {
                State::Open => Err(CircuitBreakerError::Open),
                State::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                    Err(CircuitBreakerError::TooManyRequests)
                }
                State::Closed | State::HalfOpen => {
                    inner.counts.on_request();
                    Ok((inner.generation, inner.state))
                }
            };
            (admission, transition)
        };
        self.announce(transition);
        admission
    }

    /// Record the outcome of an admitted call.
    fn after_call(&self, generation: u64, success: bool) {
        let transition = {
            let mut inner = self.lock();
            let now = Instant::now();
            let refreshed = self.refresh(&mut inner, now);

            if inner.generation == generation {
                let recorded = if success {
                    self.on_success(&mut inner, now)
                } else {
                    self.on_failure(&mut inner, now)
                };
                recorded.or(refreshed)
            } else {
                refreshed
            }
        };
        self.announce(transition);
    }

    fn on_success(&self, inner: &mut BreakerState, now: Instant) -> Transition {
        match inner.state {
            State::Closed => {
                inner.counts.on_success();
                None
            }
            State::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.config.max_requests {
                    self.set_state(inner, State::Closed, now)
                } else {
                    None
                }
            }
            State::Open => None,
        }
    }

    fn on_failure(&self, inner: &mut BreakerState, now: Instant) -> Transition {
        match inner.state {
            State::Closed => {
                inner.counts.on_failure();
                if inner.counts.consecutive_failures >= self.config.failure_threshold {
                    self.set_state(inner, State::Open, now)
                } else {
                    None
                }
            }
            State::HalfOpen => self.set_state(inner, State::Open, now),
            State::Open => None,
        }
    }

    /// Apply time-based transitions: interval rollover in `Closed`, cooldown expiry in `Open`.
    fn refresh(&self, inner: &mut BreakerState, now: Instant) -> Transition {
        let due = inner.expiry.is_some_and(|expiry| expiry <= now);
        match inner.state {
            State::Closed if due => {
                self.new_generation(inner, now);
                None
            }
            State::Open if due => self.set_state(inner, State::HalfOpen, now),
            _ => None,
        }
    }

    fn set_state(&self, inner: &mut BreakerState, to: State, now: Instant) -> Transition {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        self.new_generation(inner, now);
        Some((from, to))
    }

    fn new_generation(&self, inner: &mut BreakerState, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            State::Closed => (!self.config.interval.is_zero()).then(|| now + self.config.interval),
            State::Open => Some(now + self.config.timeout),
            State::HalfOpen => None,
        };
    }

    /// Log, count and forward a transition to the hook. Runs without the lock held.
    fn announce(&self, transition: Transition) {
        let Some((from, to)) = transition else {
            return;
        };

        match to {
            State::Open => tracing::warn!(breaker = %self.config.name, %from, %to, "Circuit breaker state changed"),
            State::HalfOpen | State::Closed => {
                tracing::info!(breaker = %self.config.name, %from, %to, "Circuit breaker state changed");
            }
        }
        metrics::counter!(
            "relay_breaker_transitions_total",
            "breaker" => self.config.name.clone(),
            "to" => to.to_string()
        )
        .increment(1);

        if let Some(hook) = &self.config.on_state_change {
            hook(&self.config.name, from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get circuit breaker metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Reset the circuit breaker to closed state.
    ///
    /// Useful for tests or manual intervention.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            let now = Instant::now();
            let transition = self.set_state(&mut inner, State::Closed, now);
            if transition.is_none() {
                self.new_generation(&mut inner, now);
            }
            transition
        };
        tracing::info!(breaker = %self.config.name, "Circuit breaker manually reset to closed");
        self.announce(transition);
    }
}

/// Guard for an admitted call that is dropped before it settles.
///
/// Only half-open probes are charged a failure; the caller giving up says
/// nothing about the health of the wrapped dependency.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.probe {
            self.breaker.after_call(self.generation, false);
            self.breaker.total_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::debug!(breaker = %self.breaker.config.name, "Admitted call cancelled before completion");
        }
    }
}

/// Metrics for circuit breaker monitoring.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls attempted
    pub total_calls: u64,
    /// Total number of successful calls
    pub total_successes: u64,
    /// Total number of failed calls
    pub total_failures: u64,
    /// Total number of rejected calls (open or probe budget spent)
    pub total_rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Calculate success rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        self.total_successes as f64 / self.total_calls as f64
    }

    /// Calculate rejection rate (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_rejections as f64 / self.total_calls as f64
    }
}
