//! Prometheus metrics for the projection engine.
//!
//! Emission failures are swallowed: a call to any `record_*` method never
//! returns a `Result` and never panics, matching the requirement that a
//! metrics hiccup must never affect the operation it is observing.
//!
//! # Example
//!
//! ```rust,no_run
//! use factflow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
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
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be installed or server cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this will fail
    /// with `MetricsError::Install`. In production, ensure this is only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "metrics server started");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_histogram!(
        "factflow_managed_projection_update_duration_seconds",
        "Time taken for a managed projection's execute_update critical section"
    );
    describe_histogram!(
        "factflow_fetch_duration_seconds",
        "Time taken by ProjectionEngine::fetch"
    );
    describe_histogram!(
        "factflow_find_duration_seconds",
        "Time taken by ProjectionEngine::find"
    );
    describe_histogram!(
        "factflow_event_processing_latency_seconds",
        "Time from a fact's log position timestamp to its being applied"
    );
    describe_gauge!(
        "factflow_fetch_size",
        "Number of bytes read for the most recent snapshot fetch"
    );
}

/// Records the four timed spans and one gauge the projection engine
/// emits, each tagged with the projection's `class` and (where
/// applicable) whether the call was made under a held write lock.
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record a managed projection's `execute_update` duration.
    pub fn record_managed_update(class: &'static str, duration: Duration) {
        histogram!("factflow_managed_projection_update_duration_seconds", "class" => class)
            .record(duration.as_secs_f64());
    }

    /// Record a `fetch` call's duration.
    pub fn record_fetch(class: &'static str, duration: Duration) {
        histogram!("factflow_fetch_duration_seconds", "class" => class).record(duration.as_secs_f64());
    }

    /// Record a `find` call's duration, tagged with whether it ran under
    /// a held write lock.
    pub fn record_find(class: &'static str, locked: bool, duration: Duration) {
        histogram!(
            "factflow_find_duration_seconds",
            "class" => class,
            "locked" => locked.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Record the latency between a fact becoming available and being
    /// applied to a projection.
    pub fn record_event_latency(class: &'static str, latency: Duration) {
        histogram!("factflow_event_processing_latency_seconds", "class" => class)
            .record(latency.as_secs_f64());
    }

    /// Record the byte size of the most recent snapshot fetched for
    /// `class`.
    pub fn record_fetch_size(class: &'static str, bytes: usize) {
        gauge!("factflow_fetch_size", "class" => class).set(bytes as f64);
    }
}
