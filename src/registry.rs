//! Fixed backend registry with per-backend observation state.
//!
//! The set of backends is established at startup and never changes at
//! runtime; only each entry's observation fields do. Observation fields are
//! individual atomics so the health checker, the selector, and the proxy
//! engine can touch them without a shared lock. Readers tolerate a
//! status/response-time pair observed a few nanoseconds apart; only the
//! breaker fields need to move together, and those sit behind the breaker's
//! own mutex.

use crate::config::BackendConfig;
use crate::health::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Health classification written by the checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendStatus {
    Up,
    Down,
}

const STATUS_UP: u8 = 0;
const STATUS_DOWN: u8 = 1;

/// Sentinel for "latency not yet observed"
const RT_UNKNOWN: u64 = u64::MAX;

/// A configured upstream server and its mutable observation state
pub struct Backend {
    host: String,
    port: u16,
    weight: u32,

    status: AtomicU8,
    /// Microseconds, `RT_UNKNOWN` when not yet observed
    response_time_us: AtomicU64,
    /// `f64` bit pattern, 0..100
    cpu_utilization: AtomicU64,
    /// Last selection weight computed from latency
    dynamic_weight: AtomicU32,

    breaker: CircuitBreaker,
}

impl Backend {
    pub fn new(config: &BackendConfig, breaker_config: &CircuitBreakerConfig) -> Self {
        let label = format!("{}:{}", config.host, config.port);
        Self {
            host: config.host.clone(),
            port: config.port,
            weight: config.weight.max(1),
            status: AtomicU8::new(STATUS_UP),
            response_time_us: AtomicU64::new(RT_UNKNOWN),
            cpu_utilization: AtomicU64::new(0f64.to_bits()),
            dynamic_weight: AtomicU32::new(config.weight.max(1)),
            breaker: CircuitBreaker::new(label, breaker_config),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, the upstream connect target
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured static weight
    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn status(&self) -> BackendStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_UP => BackendStatus::Up,
            _ => BackendStatus::Down,
        }
    }

    pub fn set_status(&self, status: BackendStatus) {
        let raw = match status {
            BackendStatus::Up => STATUS_UP,
            BackendStatus::Down => STATUS_DOWN,
        };
        self.status.store(raw, Ordering::Release);
    }

    pub fn is_up(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_UP
    }

    /// Last observed health-probe latency, `None` when unknown
    pub fn response_time(&self) -> Option<Duration> {
        match self.response_time_us.load(Ordering::Acquire) {
            RT_UNKNOWN => None,
            us => Some(Duration::from_micros(us)),
        }
    }

    pub fn set_response_time(&self, response_time: Option<Duration>) {
        let us = response_time
            .map(|d| (d.as_micros() as u64).min(RT_UNKNOWN - 1))
            .unwrap_or(RT_UNKNOWN);
        self.response_time_us.store(us, Ordering::Release);
    }

    pub fn cpu_utilization(&self) -> f64 {
        f64::from_bits(self.cpu_utilization.load(Ordering::Acquire))
    }

    pub fn set_cpu_utilization(&self, cpu: f64) {
        self.cpu_utilization.store(cpu.to_bits(), Ordering::Release);
    }

    pub fn dynamic_weight(&self) -> u32 {
        self.dynamic_weight.load(Ordering::Acquire)
    }

    pub fn set_dynamic_weight(&self, weight: u32) {
        self.dynamic_weight.store(weight, Ordering::Release);
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Record a successful forward through this backend
    pub fn record_success(&self) {
        self.breaker.record_success();
    }

    /// Record a forwarding failure through this backend. Only the breaker
    /// moves; status, latency, and CPU stay with the health checker.
    pub fn record_failure(&self) {
        self.breaker.record_failure();
    }

    /// A consistent read of this backend's fields for the metrics surface
    pub fn snapshot(&self) -> BackendSnapshot {
        let (circuit, fail_count) = self.breaker.snapshot();
        BackendSnapshot {
            host: self.host.clone(),
            port: self.port,
            status: self.status(),
            circuit,
            fail_count,
            response_time: self.response_time().map(|d| d.as_secs_f64()),
            weight: self.weight,
            dynamic_weight: self.dynamic_weight(),
            cpu_utilization: self.cpu_utilization(),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-backend state as exposed on the metrics surface
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub host: String,
    pub port: u16,
    pub status: BackendStatus,
    pub circuit: CircuitState,
    pub fail_count: u32,
    /// Seconds, `null` when not yet observed
    pub response_time: Option<f64>,
    pub weight: u32,
    pub dynamic_weight: u32,
    pub cpu_utilization: f64,
}

/// The fixed, ordered set of backends
pub struct Registry {
    backends: Vec<Arc<Backend>>,
}

impl Registry {
    pub fn new(configs: &[BackendConfig], breaker_config: &CircuitBreakerConfig) -> Self {
        let backends = configs
            .iter()
            .map(|c| Arc::new(Backend::new(c, breaker_config)))
            .collect();
        Self { backends }
    }

    /// All backends in stable configuration order
    pub fn all(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Backend>> {
        self.backends.get(index)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Snapshot of every backend for the metrics surface. Not atomic across
    /// backends; each entry is internally consistent.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.backends.iter().map(|b| b.snapshot()).collect()
    }
}
