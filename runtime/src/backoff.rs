//! Capped exponential backoff for consumer loops.
//!
//! After a read, decode or handler failure the dispatch loop sleeps before taking
//! the next message, so a persistently failing dependency is not hammered. The
//! delay doubles with each consecutive failure up to a cap and snaps back to zero
//! as soon as one message is handled successfully.
//!
//! # Example
//!
//! ```rust
//! use relay_runtime::backoff::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff::builder()
//!     .initial_delay(Duration::from_millis(10))
//!     .max_delay(Duration::from_secs(1))
//!     .multiplier(2)
//!     .build();
//!
//! assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(10));
//! assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(80));
//! assert_eq!(backoff.delay_for_attempt(30), Duration::from_secs(1));
//! ```

use std::time::Duration;

/// Backoff policy configuration.
///
/// # Default Values
///
/// - `initial_delay`: 10ms
/// - `max_delay`: 1 second
/// - `multiplier`: 2 (delay doubles each failure)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Cap for the exponential growth
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Backoff {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> BackoffBuilder {
        BackoffBuilder {
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Delay before the next message after `attempt` prior consecutive failures.
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Start tracking consecutive failures under this policy.
    #[must_use]
    pub const fn tracker(self) -> BackoffTracker {
        BackoffTracker {
            policy: self,
            failures: 0,
        }
    }
}

/// Builder for [`Backoff`].
#[derive(Debug, Clone)]
pub struct BackoffBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<u32>,
}

impl BackoffBuilder {
    /// Set the delay after the first failure.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the cap for exponential growth.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor (minimum 1).
    #[must_use]
    pub const fn multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`Backoff`].
    #[must_use]
    pub fn build(self) -> Backoff {
        let initial_delay = self.initial_delay.unwrap_or(Duration::from_millis(10));
        Backoff {
            initial_delay,
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(1)).max(initial_delay),
            multiplier: self.multiplier.unwrap_or(2).max(1),
        }
    }
}

/// Consecutive-failure state for one consumer loop.
#[derive(Debug, Clone)]
pub struct BackoffTracker {
    policy: Backoff,
    failures: u32,
}

impl BackoffTracker {
    /// Record a failure and return how long to sleep before the next message.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.policy.delay_for_attempt(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Record a success; the next failure starts again from the initial delay.
    pub const fn on_success(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}
