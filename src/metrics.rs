//! Prometheus metrics for the batch scheduler.
//!
//! Initialize once and hand the handle to the scheduler:
//! ```ignore
//! let metrics = coalescer::metrics::init()?;
//! let scheduler = BatchScheduler::new(config, prompt, upstream, Some(metrics.clone()))?;
//! ```
//!
//! Then serve it:
//! ```ignore
//! coalescer::metrics::run_metrics_server(addr, metrics, shutdown_rx).await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    core::Collector, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec,
    Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::outcome::RequestResult;

/// Default histogram buckets for upstream call latencies (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0, 50.0];

/// Dispatch mode label values.
pub const MODE_COMBINED: &str = "combined";
pub const MODE_INDIVIDUAL: &str = "individual";

/// Metrics handle containing all metric instruments.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    requests_submitted: Counter,
    batches_dispatched: CounterVec,
    batch_size: Histogram,
    upstream_call_duration: HistogramVec,
    results: CounterVec,
    pending_requests: Gauge,
}

impl Metrics {
    /// Get the prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_submit(&self, pending: usize) {
        self.requests_submitted.inc();
        self.pending_requests.set(pending as f64);
    }

    /// Record a batch handed to the upstream in the given mode.
    pub fn record_batch(&self, mode: &str, size: usize) {
        self.batches_dispatched.with_label_values(&[mode]).inc();
        self.batch_size.observe(size as f64);
    }

    pub fn record_upstream_duration(&self, mode: &str, duration_secs: f64) {
        self.upstream_call_duration
            .with_label_values(&[mode])
            .observe(duration_secs);
    }

    /// Record a result reaching a terminal status. `kind` is `none` for completed results.
    pub fn record_result(&self, result: &RequestResult) {
        let kind = result
            .error
            .as_ref()
            .map(|e| e.kind.as_str())
            .unwrap_or("none");
        self.results
            .with_label_values(&[result.status.as_str(), kind])
            .inc();
    }

    pub fn set_pending_requests(&self, count: usize) {
        self.pending_requests.set(count as f64);
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

/// Helper to register a metric, logging on failure.
fn register<C: Collector + Clone + 'static>(registry: &Registry, metric: C) -> C {
    if let Err(e) = registry.register(Box::new(metric.clone())) {
        // Log but don't fail - metric may already be registered
        tracing::warn!(error = %e, "failed to register metric");
    }
    metric
}

/// Initialize the metrics system with a Prometheus registry.
///
/// Returns a `Metrics` handle that can be cloned and passed to components.
pub fn init() -> anyhow::Result<Metrics> {
    let registry = Registry::new();

    let requests_submitted = register(
        &registry,
        Counter::with_opts(Opts::new(
            "coalescer_requests_submitted_total",
            "Total number of requests admitted",
        ))?,
    );

    let batches_dispatched = register(
        &registry,
        CounterVec::new(
            Opts::new(
                "coalescer_batches_dispatched_total",
                "Total number of batches dispatched upstream",
            ),
            &["mode"],
        )?,
    );

    let batch_size = register(
        &registry,
        Histogram::with_opts(
            HistogramOpts::new("coalescer_batch_size", "Requests per dispatched batch")
                .buckets(BATCH_SIZE_BUCKETS.to_vec()),
        )?,
    );

    let upstream_call_duration = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "coalescer_upstream_call_duration_seconds",
                "Duration of upstream invocations in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["mode"],
        )?,
    );

    let results = register(
        &registry,
        CounterVec::new(
            Opts::new(
                "coalescer_results_total",
                "Total number of results reaching a terminal status",
            ),
            &["status", "kind"],
        )?,
    );

    let pending_requests = register(
        &registry,
        Gauge::with_opts(Opts::new(
            "coalescer_pending_requests",
            "Requests waiting in the pending buffer",
        ))?,
    );

    Ok(Metrics {
        registry: Arc::new(registry),
        requests_submitted,
        batches_dispatched,
        batch_size,
        upstream_call_duration,
        results,
        pending_requests,
    })
}

/// Axum handler for the `/metrics` endpoint.
async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

/// Router serving `/metrics` for the given handle.
pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Run the Prometheus metrics HTTP server.
///
/// Listens on the given address and serves metrics at `/metrics`.
/// Shuts down gracefully when shutdown signal is received.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Metrics,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    debug!(addr = %addr, "metrics server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            debug!("metrics server shutting down");
        })
        .await?;

    Ok(())
}
