//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the pipeline and the relay:
//! - Requests, rejections and latency per request type
//! - Cache hits and misses
//! - Retries and fallbacks
//! - Circuit breaker transitions
//! - Relay delivery tiers, consumer outcomes and job runs
//!
//! # Example
//!
//! ```rust,no_run
//! use relaykit_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.serve()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use relaykit_core::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

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

    fn builder() -> Result<PrometheusBuilder, MetricsError> {
        register_metrics();
        PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .map_err(|e| MetricsError::Build(e.to_string()))
    }

    /// Install the recorder without an HTTP listener.
    ///
    /// Metrics can then be read with [`MetricsServer::render`].
    ///
    /// # Errors
    ///
    /// Returns error if the metrics exporter cannot be installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a warning and
    /// leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        match Self::builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => Self::tolerate_reinstall(&e.to_string()),
        }
    }

    /// Install the recorder and serve `/metrics` on the configured address.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be installed or the listener cannot bind.
    pub fn serve(&mut self) -> Result<(), MetricsError> {
        match Self::builder()?.with_http_listener(self.addr).install() {
            Ok(()) => {
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => Self::tolerate_reinstall(&e.to_string()),
        }
    }

    fn tolerate_reinstall(err_msg: &str) -> Result<(), MetricsError> {
        if err_msg.contains("already initialized") {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            Ok(())
        } else {
            Err(MetricsError::Install(err_msg.to_string()))
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Pipeline
    describe_counter!(
        "pipeline_requests_total",
        "Total number of requests entering the pipeline"
    );
    describe_counter!(
        "pipeline_rejections_total",
        "Requests rejected by a resiliency layer, by kind"
    );
    describe_histogram!(
        "pipeline_request_duration_seconds",
        "Time spent below the performance layer"
    );
    describe_counter!("pipeline_cache_hits_total", "Responses served from cache");
    describe_counter!(
        "pipeline_cache_misses_total",
        "Cacheable requests that executed the inner chain"
    );
    describe_counter!("pipeline_retries_total", "Handler retry attempts");
    describe_counter!(
        "pipeline_fallbacks_total",
        "Requests answered by a fallback handler"
    );
    describe_counter!(
        "circuit_breaker_transitions_total",
        "Circuit breaker state transitions, by target state"
    );

    // Relay
    describe_counter!(
        "relay_produced_total",
        "Outbound messages accepted, by delivery tier"
    );
    describe_counter!(
        "relay_consumed_total",
        "Inbound messages handled, by outcome"
    );
    describe_counter!("relay_job_runs_total", "Reconciliation job executions");
}

/// Pipeline metrics recorder.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Record a request entering the pipeline.
    pub fn record_request(request: &'static str) {
        counter!("pipeline_requests_total", "request" => request).increment(1);
    }

    /// Record a rejection by a resiliency layer.
    pub fn record_rejection(request: &'static str, kind: ErrorKind) {
        counter!(
            "pipeline_rejections_total",
            "request" => request,
            "kind" => kind.as_str()
        )
        .increment(1);
    }

    /// Record the inner chain latency.
    pub fn record_duration(request: &'static str, duration: Duration) {
        histogram!("pipeline_request_duration_seconds", "request" => request)
            .record(duration.as_secs_f64());
    }

    /// Record a cache lookup.
    pub fn record_cache(request: &'static str, hit: bool) {
        if hit {
            counter!("pipeline_cache_hits_total", "request" => request).increment(1);
        } else {
            counter!("pipeline_cache_misses_total", "request" => request).increment(1);
        }
    }

    /// Record a retry attempt.
    pub fn record_retry(request: &'static str) {
        counter!("pipeline_retries_total", "request" => request).increment(1);
    }

    /// Record a fallback invocation.
    pub fn record_fallback(request: &'static str) {
        counter!("pipeline_fallbacks_total", "request" => request).increment(1);
    }

    /// Record a circuit breaker transition.
    pub fn record_transition(request: &str, to: &'static str) {
        counter!(
            "circuit_breaker_transitions_total",
            "request" => request.to_string(),
            "to" => to
        )
        .increment(1);
    }
}

/// Relay metrics recorder.
pub struct RelayMetrics;

impl RelayMetrics {
    /// Record an outbound message accepted by `tier`.
    pub fn record_produced(tier: &'static str) {
        counter!("relay_produced_total", "tier" => tier).increment(1);
    }

    /// Record an inbound message outcome.
    pub fn record_consumed(outcome: &'static str) {
        counter!("relay_consumed_total", "outcome" => outcome).increment(1);
    }

    /// Record a job execution.
    pub fn record_job_run(job: &str) {
        counter!("relay_job_runs_total", "job" => job.to_string()).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        server.start().unwrap();

        PipelineMetrics::record_request("GetOrderQuery");
        PipelineMetrics::record_rejection("GetOrderQuery", ErrorKind::RateLimited);
        RelayMetrics::record_produced("stream");

        // If this test runs after another test initialized the recorder,
        // handle might be None. That's OK - metrics are still being recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("pipeline_requests_total"));
            assert!(rendered.contains("pipeline_rejections_total"));
            assert!(rendered.contains("relay_produced_total"));
        }
    }
}
