//! Backend selection for incoming connections.
//!
//! Selection is weighted-random: every available backend gets a dynamic
//! weight derived from its static weight and last observed latency, then a
//! single roll over the cumulative weights picks the winner. Sticky sessions
//! short-circuit the draw while the remembered backend stays available.

pub mod session;

use crate::registry::{Backend, Registry};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How session keys are derived from a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Peer IP address
    Ip,
    /// `SessionID` cookie from the initial request bytes, IP fallback
    Cookie,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    /// Pin each session key to its previously chosen backend
    #[serde(default)]
    pub sticky_session: bool,

    #[serde(default = "default_session_mode")]
    pub session_mode: SessionMode,

    /// Scale selection weights by observed latency
    #[serde(default = "default_true")]
    pub adjust_weights: bool,
}

fn default_session_mode() -> SessionMode {
    SessionMode::Ip
}

fn default_true() -> bool {
    true
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            sticky_session: false,
            session_mode: default_session_mode(),
            adjust_weights: default_true(),
        }
    }
}

/// Selection weight from static weight and last observed latency.
///
/// Unknown latency counts as 1s and the effective latency is clamped below
/// at 100ms. The result never drops under 1, so every available backend
/// stays in the draw.
fn dynamic_weight(static_weight: u32, response_time: Option<Duration>) -> u32 {
    let effective_rt = response_time.map(|d| d.as_secs_f64()).unwrap_or(1.0);
    let factor = 1.0 / effective_rt.max(0.1);
    ((static_weight as f64 * factor).floor() as u32).max(1)
}

/// Weighted-random backend selector with optional session affinity
pub struct Selector {
    registry: Arc<Registry>,
    config: BalancerConfig,

    /// session key -> registry index of the pinned backend
    sessions: DashMap<String, usize>,

    rng: Mutex<StdRng>,
}

impl Selector {
    pub fn new(registry: Arc<Registry>, config: BalancerConfig) -> Self {
        Self::with_rng(registry, config, StdRng::from_entropy())
    }

    /// Selector with a fixed RNG seed, for reproducible selection sequences
    pub fn with_seed(registry: Arc<Registry>, config: BalancerConfig, seed: u64) -> Self {
        Self::with_rng(registry, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(registry: Arc<Registry>, config: BalancerConfig, rng: StdRng) -> Self {
        Self {
            registry,
            config,
            sessions: DashMap::new(),
            rng: Mutex::new(rng),
        }
    }

    /// Choose a backend for a request, or `None` when nothing is available.
    ///
    /// Checking availability doubles as the open-circuit cooldown gate: an
    /// open breaker whose cooldown has elapsed flips to half-open here and
    /// the backend joins the draw as a recovery probe.
    pub fn choose(&self, session_key: Option<&str>) -> Option<Arc<Backend>> {
        if self.config.sticky_session {
            if let Some(key) = session_key {
                if let Some(backend) = self.sticky_lookup(key) {
                    return Some(backend);
                }
            }
        }

        let available: Vec<(usize, Arc<Backend>)> = self
            .registry
            .all()
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_up() && b.breaker().try_acquire())
            .map(|(i, b)| (i, Arc::clone(b)))
            .collect();

        if available.is_empty() {
            warn!("No available backends to handle the request");
            return None;
        }

        for (_, backend) in &available {
            let weight = if self.config.adjust_weights {
                dynamic_weight(backend.weight(), backend.response_time())
            } else {
                backend.weight()
            };
            backend.set_dynamic_weight(weight);
        }

        let (index, chosen) = self.draw(&available);

        if self.config.sticky_session {
            if let Some(key) = session_key {
                self.sessions.insert(key.to_string(), index);
                debug!("Pinned session {} to backend {}", key, chosen);
            }
        }

        Some(chosen)
    }

    /// Returns the pinned backend for `key` if it is still available
    fn sticky_lookup(&self, key: &str) -> Option<Arc<Backend>> {
        let index = *self.sessions.get(key)?;
        let backend = self.registry.get(index)?;
        if backend.is_up() && backend.breaker().try_acquire() {
            debug!("Sticky session {} -> backend {}", key, backend);
            return Some(Arc::clone(backend));
        }
        None
    }

    /// Single roll over the cumulative dynamic weights, in registry order
    fn draw(&self, available: &[(usize, Arc<Backend>)]) -> (usize, Arc<Backend>) {
        let total: u64 = available.iter().map(|(_, b)| b.dynamic_weight() as u64).sum();

        let mut rng = self.rng.lock();
        if total == 0 {
            // Unreachable given the weight floor of 1
            let pick = rng.gen_range(0..available.len());
            let (index, backend) = &available[pick];
            return (*index, Arc::clone(backend));
        }

        let roll = rng.gen_range(1..=total);
        let mut cumulative = 0u64;
        for (index, backend) in available {
            cumulative += backend.dynamic_weight() as u64;
            if roll <= cumulative {
                return (*index, Arc::clone(backend));
            }
        }

        let (index, backend) = available.last().expect("available set is non-empty");
        (*index, Arc::clone(backend))
    }

    /// Number of live session pins
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
