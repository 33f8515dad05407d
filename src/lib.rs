//! Spindle
//!
//! A layer-4/7 reverse proxy that spreads client connections across a fixed
//! set of backends. Selection is weighted-random with weights scaled by
//! observed latency, optionally pinned per session. Every backend sits
//! behind its own circuit breaker driven by forwarding outcomes, while an
//! out-of-band checker reclassifies backends from reachability, HTTP
//! liveness, and reported CPU load.

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod routing;

pub use config::Config;
pub use error::{Error, Result};
pub use proxy::ProxyServer;
