//! Configuration for the proxy, backend registry, and health subsystems.
//!
//! Configuration is immutable after construction; there is no hot-reload.
//! Every section has serde defaults so a minimal file only needs the
//! backend list.

use crate::error::{Error, Result};
use crate::health::checker::HealthConfig;
use crate::health::circuit_breaker::CircuitBreakerConfig;
use crate::routing::BalancerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// The fixed backend set; entries never change at runtime
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub balancer: BalancerConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            metrics: MetricsConfig::default(),
            backends: default_backends(),
            balancer: BalancerConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Upstream connect timeout, in seconds
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_proxy_port(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_metrics_port(),
        }
    }
}

impl MetricsConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,

    /// Static selection weight
    #[serde(default = "default_weight")]
    pub weight: u32,
}

// Default functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_connect_timeout_seconds() -> u64 {
    2
}

fn default_weight() -> u32 {
    1
}

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            host: "127.0.0.1".to_string(),
            port: 9001,
            weight: 1,
        },
        BackendConfig {
            host: "127.0.0.1".to_string(),
            port: 9002,
            weight: 2,
        },
    ]
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::Config("At least one backend is required".into()));
        }

        for backend in &self.backends {
            if backend.host.is_empty() {
                return Err(Error::Config("Backend host must not be empty".into()));
            }
            if backend.port == 0 {
                return Err(Error::Config(format!(
                    "Backend {} has an invalid port 0",
                    backend.host
                )));
            }
            if backend.weight == 0 {
                return Err(Error::Config(format!(
                    "Backend {}:{} must have weight >= 1",
                    backend.host, backend.port
                )));
            }
        }

        if self.circuit_breaker.fail_threshold == 0 {
            return Err(Error::Config("fail_threshold must be >= 1".into()));
        }
        if self.circuit_breaker.open_time_seconds == 0 {
            return Err(Error::Config("open_time_seconds must be >= 1".into()));
        }

        if self.health.interval_stable_seconds == 0 || self.health.interval_unstable_seconds == 0 {
            return Err(Error::Config("Health intervals must be >= 1 second".into()));
        }
        if self.health.probe_timeout_seconds == 0 {
            return Err(Error::Config("probe_timeout_seconds must be >= 1".into()));
        }
        if !(0.0..=100.0).contains(&self.health.cpu_threshold) {
            return Err(Error::Config("cpu_threshold must be within 0..=100".into()));
        }

        Ok(())
    }
}
