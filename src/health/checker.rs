//! Out-of-band backend health classification.
//!
//! Each cycle probes every backend concurrently: a TCP connect against the
//! service port for reachability (a portable stand-in for ICMP echo), then
//! an HTTP GET on `/health`. Backends over the CPU threshold are classified
//! DOWN even when the endpoint answers 200. Results land in the registry's
//! observation fields only; circuit breakers belong to the traffic path and
//! are never driven from here.

use crate::metrics;
use crate::registry::{Backend, BackendStatus, Registry};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Cycle interval while every backend is UP, in seconds
    #[serde(default = "default_interval_stable_seconds")]
    pub interval_stable_seconds: u64,

    /// Cycle interval while any backend is DOWN, in seconds
    #[serde(default = "default_interval_unstable_seconds")]
    pub interval_unstable_seconds: u64,

    /// Per-probe timeout for both the connect and the HTTP GET, in seconds
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,

    /// Backends reporting CPU above this are classified DOWN
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,
}

fn default_interval_stable_seconds() -> u64 {
    5
}

fn default_interval_unstable_seconds() -> u64 {
    2
}

fn default_probe_timeout_seconds() -> u64 {
    2
}

fn default_cpu_threshold() -> f64 {
    90.0
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_stable_seconds: default_interval_stable_seconds(),
            interval_unstable_seconds: default_interval_unstable_seconds(),
            probe_timeout_seconds: default_probe_timeout_seconds(),
            cpu_threshold: default_cpu_threshold(),
        }
    }
}

impl HealthConfig {
    pub fn stable_interval(&self) -> Duration {
        Duration::from_secs(self.interval_stable_seconds)
    }

    pub fn unstable_interval(&self) -> Duration {
        Duration::from_secs(self.interval_unstable_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

/// Body reported by a backend's `/health` endpoint
#[derive(Debug, Deserialize)]
struct HealthReport {
    #[serde(default)]
    cpu_utilization: f64,
}

/// Outcome of one probe of one backend
#[derive(Debug)]
struct Observation {
    status: BackendStatus,
    response_time: Option<Duration>,
    cpu_utilization: f64,
}

impl Observation {
    fn down() -> Self {
        Self {
            status: BackendStatus::Down,
            response_time: None,
            cpu_utilization: 0.0,
        }
    }
}

/// Periodic health driver for the whole registry
pub struct HealthChecker {
    registry: Arc<Registry>,
    config: HealthConfig,
    http: reqwest::Client,
    shutdown: broadcast::Receiver<()>,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<Registry>,
        config: HealthConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.probe_timeout())
            .build()
            .unwrap_or_default();

        Self {
            registry,
            config,
            http,
            shutdown,
        }
    }

    /// Run probe cycles until shutdown is signalled
    pub async fn run(mut self) {
        info!(
            "Health checker started ({} backends, {}s/{}s intervals)",
            self.registry.len(),
            self.config.interval_stable_seconds,
            self.config.interval_unstable_seconds
        );

        loop {
            let any_down = self.cycle().await;

            let sleep_for = if any_down {
                self.config.unstable_interval()
            } else {
                self.config.stable_interval()
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {},
                _ = self.shutdown.recv() => {
                    info!("Health checker stopping");
                    return;
                },
            }
        }
    }

    /// Probe every backend concurrently and apply the observations.
    /// Returns whether any backend is currently DOWN.
    pub async fn cycle(&self) -> bool {
        let probes = self.registry.all().iter().map(|b| self.probe(Arc::clone(b)));
        let observations = join_all(probes).await;

        let mut any_down = false;
        for (backend, observation) in self.registry.all().iter().zip(observations) {
            backend.set_status(observation.status);
            backend.set_response_time(observation.response_time);
            backend.set_cpu_utilization(observation.cpu_utilization);
            metrics::update_backend_observation(backend);

            if observation.status == BackendStatus::Down {
                any_down = true;
            }

            debug!(
                "Health: {} status={:?} response_time={:?} cpu={:.1}%",
                backend,
                observation.status,
                observation.response_time,
                observation.cpu_utilization
            );
        }

        any_down
    }

    async fn probe(&self, backend: Arc<Backend>) -> Observation {
        let addr = backend.addr();

        // Reachability first; an unreachable port makes the HTTP step moot
        match timeout(self.config.probe_timeout(), TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => {
                warn!("Reachability probe failed for {}: {}", addr, e);
                metrics::record_health_check(&addr, "unreachable");
                return Observation::down();
            },
            Err(_) => {
                warn!("Reachability probe timed out for {}", addr);
                metrics::record_health_check(&addr, "unreachable");
                return Observation::down();
            },
        }

        let url = format!("http://{}/health", addr);
        let started = Instant::now();

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() { "timed out" } else { "failed" };
                warn!("Health endpoint {} {}: {}", url, reason, e);
                metrics::record_health_check(&addr, "http_error");
                return Observation::down();
            },
        };

        let elapsed = started.elapsed();

        if !response.status().is_success() {
            warn!("Health endpoint {} returned {}", url, response.status());
            metrics::record_health_check(&addr, "http_error");
            return Observation::down();
        }

        // Missing or non-JSON bodies simply report no CPU pressure
        let cpu_utilization = response
            .json::<HealthReport>()
            .await
            .map(|report| report.cpu_utilization)
            .unwrap_or(0.0);

        if cpu_utilization > self.config.cpu_threshold {
            warn!(
                "Backend {} over CPU threshold ({:.1}% > {:.1}%)",
                addr, cpu_utilization, self.config.cpu_threshold
            );
            metrics::record_health_check(&addr, "overloaded");
            return Observation {
                status: BackendStatus::Down,
                response_time: Some(elapsed),
                cpu_utilization,
            };
        }

        metrics::record_health_check(&addr, "up");
        Observation {
            status: BackendStatus::Up,
            response_time: Some(elapsed),
            cpu_utilization,
        }
    }
}
