//! Circuit breakers prevent cascading failures by temporarily
//! taking failing backends out of selection.
//!
//! Transitions are driven exclusively by the proxy engine's observed
//! forwarding outcomes; the out-of-band health checker never touches
//! breaker state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, traffic allowed
    Closed,

    /// Failing, traffic blocked until the cooldown elapses
    Open,

    /// Cooldown elapsed, the next request probes recovery
    HalfOpen,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures needed to open the circuit
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,

    /// Cooldown before an open circuit admits a probe, in seconds
    #[serde(default = "default_open_time_seconds")]
    pub open_time_seconds: u64,
}

fn default_fail_threshold() -> u32 {
    3
}

fn default_open_time_seconds() -> u64 {
    5
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_threshold: default_fail_threshold(),
            open_time_seconds: default_open_time_seconds(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_time(&self) -> Duration {
        Duration::from_secs(self.open_time_seconds)
    }
}

/// Mutable breaker fields, guarded together so every observed state is
/// reachable from the previous one by a single legal transition.
#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    fail_count: u32,
    open_until: Option<Instant>,
}

/// Circuit breaker for an individual backend
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Backend label for logs, `host:port`
    label: String,

    fail_threshold: u32,
    open_time: Duration,

    core: Mutex<BreakerCore>,
}

impl CircuitBreaker {
    /// Create new circuit breaker in the closed state
    pub fn new(label: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            label: label.into(),
            fail_threshold: config.fail_threshold,
            open_time: config.open_time(),
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                fail_count: 0,
                open_until: None,
            }),
        }
    }

    /// Check whether a request may be routed through this backend.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open here,
    /// so the caller's request doubles as the recovery probe.
    pub fn try_acquire(&self) -> bool {
        let mut core = self.core.lock();

        match core.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = core.open_until.map_or(true, |until| Instant::now() >= until);
                if expired {
                    core.state = CircuitState::HalfOpen;
                    core.fail_count = 0;
                    core.open_until = None;
                    info!(
                        "Circuit breaker HALF-OPEN for backend {} (probing recovery)",
                        self.label
                    );
                    true
                } else {
                    false
                }
            },
        }
    }

    /// Record a successfully completed forward
    pub fn record_success(&self) {
        let mut core = self.core.lock();

        match core.state {
            CircuitState::Closed => {
                core.fail_count = 0;
            },
            CircuitState::HalfOpen => {
                core.state = CircuitState::Closed;
                core.fail_count = 0;
                core.open_until = None;
                info!("Circuit breaker CLOSED for backend {} (recovered)", self.label);
            },
            CircuitState::Open => {
                warn!("Success recorded while circuit open for {}", self.label);
            },
        }
    }

    /// Record a forwarding failure
    pub fn record_failure(&self) {
        let mut core = self.core.lock();

        match core.state {
            CircuitState::Closed => {
                core.fail_count += 1;
                if core.fail_count >= self.fail_threshold {
                    core.state = CircuitState::Open;
                    core.open_until = Some(Instant::now() + self.open_time);
                    warn!(
                        "Circuit breaker OPEN for backend {} after {} consecutive failures",
                        self.label, core.fail_count
                    );
                }
            },
            CircuitState::HalfOpen => {
                // Failed probe, back to open with a fresh cooldown
                core.fail_count += 1;
                core.state = CircuitState::Open;
                core.open_until = Some(Instant::now() + self.open_time);
                warn!(
                    "Circuit breaker re-OPEN for backend {} (probe failed)",
                    self.label
                );
            },
            CircuitState::Open => {
                core.fail_count = core.fail_count.saturating_add(1);
            },
        }
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// Get current failure count
    pub fn fail_count(&self) -> u32 {
        self.core.lock().fail_count
    }

    /// State and failure count read under one lock, for metrics snapshots
    pub fn snapshot(&self) -> (CircuitState, u32) {
        let core = self.core.lock();
        (core.state, core.fail_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            fail_threshold: 3,
            open_time_seconds: 1,
        }
    }

    fn fast_breaker(open_time: Duration) -> CircuitBreaker {
        let mut breaker = CircuitBreaker::new("127.0.0.1:9001", &test_config());
        breaker.open_time = open_time;
        breaker
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("127.0.0.1:9001", &test_config());

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.fail_count(), 2);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new("127.0.0.1:9001", &test_config());

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.fail_count(), 0);
    }

    #[test]
    fn half_open_probe_recovers() {
        let breaker = fast_breaker(Duration::from_millis(50));

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());

        sleep(Duration::from_millis(80));

        // Cooldown elapsed, the next acquisition is the probe
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.fail_count(), 0);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.fail_count(), 0);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = fast_breaker(Duration::from_millis(50));

        for _ in 0..3 {
            breaker.record_failure();
        }
        sleep(Duration::from_millis(80));
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());

        // The cooldown was refreshed by the failed probe
        sleep(Duration::from_millis(80));
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

}
