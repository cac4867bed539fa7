//! # Relay Runtime
//!
//! Runtime machinery for request/reply over an asynchronous message broker.
//!
//! ## Core Components
//!
//! - **Circuit breaker**: sheds load when the broker or a handler keeps failing
//! - **Guarded publisher**: publishes envelopes through a shared breaker
//! - **Correlation waiter**: polls the rendezvous store until an answer appears or
//!   the deadline passes
//! - **Consumer dispatch loop**: one long-lived loop per subscription, decoding
//!   envelopes and handing them to a [`MessageHandler`](dispatch::MessageHandler)
//! - **Orchestrator**: publish a request, then block on the waiter
//!
//! ## Example
//!
//! ```ignore
//! use relay_runtime::orchestrator::RequestReplyOrchestrator;
//!
//! let orchestrator = RequestReplyOrchestrator::new(publisher, waiter);
//!
//! let answer: StoreValidationResponse = orchestrator
//!     .call("store-validation-request", &StoreValidationRequest { store_id, user_id })
//!     .await?;
//! ```

/// Consumer backoff policy
pub mod backoff;

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Consumer dispatch loop and message handlers
pub mod dispatch;

/// Prometheus metrics for observability
pub mod metrics;

/// Request/reply orchestration
pub mod orchestrator;

/// Breaker-guarded publishing
pub mod publisher;

/// Correlation waiter
pub mod waiter;

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use dispatch::{ConsumerDispatchLoop, DispatchError, MessageHandler};
pub use orchestrator::{OrchestratorError, RequestReplyOrchestrator};
pub use publisher::{GuardedPublisher, PublishError};
pub use waiter::{CorrelationWaiter, WaitError, WaiterConfig};

/// Health check status levels
///
/// Indicates the current health state of a component or system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but probing recovery (breaker half-open)
    Degraded,

    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_prefers_unhealthy() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.worst(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert!(HealthStatus::Healthy.is_healthy());
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
    }
}
