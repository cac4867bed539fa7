//! Prometheus metrics for observability and monitoring.
//!
//! Components record through the `metrics` macros unconditionally; without an
//! installed recorder those calls are no-ops. [`MetricsServer`] installs the
//! Prometheus recorder and describes every relay metric:
//! - Publishes and publish errors
//! - Consumed, malformed and failed messages
//! - Rendezvous writes, waiter timeouts and wait latency
//! - Circuit breaker transitions and rejections
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the relay metrics, install the recorder and start the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), the call logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.build() {
            Ok((recorder, exporter)) => {
                let handle = recorder.handle();
                if metrics::set_global_recorder(recorder).is_err() {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    return Ok(());
                }
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!("Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics server started - available at http://{}/metrics", self.addr);
                Ok(())
            }
            Err(e) => Err(MetricsError::Install(e.to_string())),
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Publishing
    describe_counter!(
        "relay_messages_published_total",
        "Total number of messages published through the guarded publisher"
    );
    describe_counter!(
        "relay_publish_errors_total",
        "Total number of publishes failed by the broker"
    );

    // Consuming
    describe_counter!(
        "relay_messages_consumed_total",
        "Total number of messages pulled by consumer loops"
    );
    describe_counter!(
        "relay_decode_errors_total",
        "Total number of malformed messages skipped"
    );
    describe_counter!(
        "relay_handler_errors_total",
        "Total number of messages skipped after a handler failure"
    );

    // Rendezvous
    describe_counter!(
        "relay_rendezvous_writes_total",
        "Total number of answers written to the rendezvous store"
    );
    describe_counter!(
        "relay_waiter_timeouts_total",
        "Total number of waits that reached their deadline"
    );
    describe_histogram!(
        "relay_waiter_wait_duration_seconds",
        "Time between starting to wait and observing the answer"
    );

    // Circuit breaker
    describe_counter!(
        "relay_breaker_transitions_total",
        "Total number of circuit breaker state transitions"
    );
    describe_counter!(
        "relay_breaker_rejections_total",
        "Total number of calls rejected by an open or saturated breaker"
    );
}
