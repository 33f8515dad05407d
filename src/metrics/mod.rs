//! Control-plane surface: the JSON backend snapshot contract plus
//! Prometheus instrumentation following Prometheus naming conventions.

use crate::error::{Error, Result};
use crate::registry::{Backend, BackendStatus, Registry};
use crate::health::circuit_breaker::CircuitState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use lazy_static::lazy_static;
use prometheus::{
    opts, register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec,
    Registry as PrometheusRegistry, TextEncoder,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

lazy_static! {
    // Data-plane outcomes
    pub static ref PROXY_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "spindle_proxy_requests_total",
            "Proxied client connections by backend and outcome"
        ),
        &["backend", "outcome"]
    ).unwrap();

    // Backend observations
    pub static ref BACKEND_UP: GaugeVec = register_gauge_vec!(
        opts!(
            "spindle_backend_up",
            "Backend health status (0=down, 1=up)"
        ),
        &["backend"]
    ).unwrap();

    pub static ref BACKEND_RESPONSE_TIME_SECONDS: GaugeVec = register_gauge_vec!(
        opts!(
            "spindle_backend_response_time_seconds",
            "Last observed health-probe latency"
        ),
        &["backend"]
    ).unwrap();

    pub static ref BACKEND_CPU_UTILIZATION: GaugeVec = register_gauge_vec!(
        opts!(
            "spindle_backend_cpu_utilization",
            "CPU utilization reported by the backend (0-100)"
        ),
        &["backend"]
    ).unwrap();

    // Circuit breaker state
    pub static ref CIRCUIT_BREAKER_STATE: GaugeVec = register_gauge_vec!(
        opts!(
            "spindle_circuit_breaker_state",
            "Circuit breaker state (0=closed, 1=open, 2=half-open)"
        ),
        &["backend"]
    ).unwrap();

    // Health check outcomes
    pub static ref HEALTH_CHECKS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "spindle_health_checks_total",
            "Health probes by backend and result"
        ),
        &["backend", "result"]
    ).unwrap();

    // Registry for all metrics
    pub static ref REGISTRY: PrometheusRegistry = {
        let registry = PrometheusRegistry::new();
        registry.register(Box::new(PROXY_REQUESTS_TOTAL.clone())).unwrap();
        registry.register(Box::new(BACKEND_UP.clone())).unwrap();
        registry.register(Box::new(BACKEND_RESPONSE_TIME_SECONDS.clone())).unwrap();
        registry.register(Box::new(BACKEND_CPU_UTILIZATION.clone())).unwrap();
        registry.register(Box::new(CIRCUIT_BREAKER_STATE.clone())).unwrap();
        registry.register(Box::new(HEALTH_CHECKS_TOTAL.clone())).unwrap();
        registry
    };
}

/// Record the outcome of one proxied connection
pub fn record_proxy_request(backend: &str, outcome: &str) {
    PROXY_REQUESTS_TOTAL.with_label_values(&[backend, outcome]).inc();
}

/// Record the result of one health probe
pub fn record_health_check(backend: &str, result: &str) {
    HEALTH_CHECKS_TOTAL.with_label_values(&[backend, result]).inc();
}

/// Push a backend's current observation fields into the gauges
pub fn update_backend_observation(backend: &Backend) {
    let addr = backend.addr();

    let up = match backend.status() {
        BackendStatus::Up => 1.0,
        BackendStatus::Down => 0.0,
    };
    BACKEND_UP.with_label_values(&[&addr]).set(up);

    if let Some(response_time) = backend.response_time() {
        BACKEND_RESPONSE_TIME_SECONDS
            .with_label_values(&[&addr])
            .set(response_time.as_secs_f64());
    }

    BACKEND_CPU_UTILIZATION
        .with_label_values(&[&addr])
        .set(backend.cpu_utilization());

    let state = match backend.breaker().state() {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    CIRCUIT_BREAKER_STATE.with_label_values(&[&addr]).set(state);
}

/// Build the control-plane router; every route is a read-only view
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/", get(snapshot_handler))
        .route("/metrics", get(snapshot_handler))
        .route("/metrics/prometheus", get(prometheus_handler))
        .with_state(registry)
}

/// Serve the control plane until shutdown is signalled
pub async fn serve(
    registry: Arc<Registry>,
    addr: String,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Server(format!("Failed to bind metrics listener {}: {}", addr, e)))?;

    info!("Metrics surface listening on {}", addr);

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("Metrics surface shutting down");
        })
        .await
        .map_err(|e| Error::Server(format!("Metrics server error: {}", e)))
}

/// JSON snapshot of every backend, the read-only monitoring contract
async fn snapshot_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    // A scrape doubles as a refresh of the breaker-state gauges
    for backend in registry.all() {
        update_backend_observation(backend);
    }

    (
        StatusCode::OK,
        [(header::CONNECTION, "close")],
        Json(registry.snapshot()),
    )
}

/// Prometheus text exposition of the instrumentation registry
async fn prometheus_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                b"Failed to encode metrics".to_vec(),
            )
        },
    }
}
