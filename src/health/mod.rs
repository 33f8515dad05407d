//! Backend health: traffic-driven circuit breaking and out-of-band probing.

pub mod checker;
pub mod circuit_breaker;

pub use checker::{HealthChecker, HealthConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
