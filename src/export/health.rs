use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::metric_set::MetricSet;

const NAMESPACE: &str = "vmsampler";

/// Prometheus metrics for sampler health, plus a mirror of the live metric set.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total successful sampling passes.
    pub samples: Counter,
    /// Failed sampling passes by error kind.
    pub sample_errors: CounterVec,
    /// Sampling pass duration (10us-100ms buckets).
    pub sample_duration: Histogram,
    /// Number of metrics discovered in the source.
    pub schema_metrics: Gauge,
    /// Generation counter of the metric set.
    pub generation: Gauge,
    /// Current metric set values by set and metric name.
    pub metric_value: IntGaugeVec,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let samples = Counter::with_opts(
            Opts::new("samples_total", "Total successful sampling passes.").namespace(NAMESPACE),
        )?;
        let sample_errors = CounterVec::new(
            Opts::new(
                "sample_errors_total",
                "Failed sampling passes by error kind.",
            )
            .namespace(NAMESPACE),
            &["kind"],
        )?;
        let sample_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sample_duration_seconds",
                "Duration of one sampling pass.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![
                0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1,
            ]),
        )?;
        let schema_metrics = Gauge::with_opts(
            Opts::new(
                "schema_metrics",
                "Number of metrics discovered in the source.",
            )
            .namespace(NAMESPACE),
        )?;
        let generation = Gauge::with_opts(
            Opts::new("generation", "Generation counter of the metric set.").namespace(NAMESPACE),
        )?;
        let metric_value = IntGaugeVec::new(
            Opts::new("metric_value", "Current metric set values.").namespace(NAMESPACE),
            &["set", "metric"],
        )?;

        registry.register(Box::new(samples.clone()))?;
        registry.register(Box::new(sample_errors.clone()))?;
        registry.register(Box::new(sample_duration.clone()))?;
        registry.register(Box::new(schema_metrics.clone()))?;
        registry.register(Box::new(generation.clone()))?;
        registry.register(Box::new(metric_value.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            samples,
            sample_errors,
            sample_duration,
            schema_metrics,
            generation,
            metric_value,
        })
    }

    /// Copy every value of `set` into the `metric_value` gauge.
    pub fn mirror_set(&self, set: &MetricSet) {
        for (name, value) in set.snapshot() {
            self.metric_value
                .with_label_values(&[set.name(), name])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }

    /// Render all registered metrics in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

fn render_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("encoding metrics")?;

    String::from_utf8(buffer).context("converting metrics to string")
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match render_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
