use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

/// Multi-backend router configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Candidate backends in order; empty means every configured backend
    #[serde(default)]
    pub backends: Vec<String>,
    /// Selection strategy
    #[serde(default)]
    pub strategy: RoutingStrategy,
    /// Try the next candidate when a dispatch fails
    #[serde(default = "default_true")]
    pub fallback_on_error: bool,
    /// Cap on candidates tried per request
    #[serde(default)]
    pub max_attempts: Option<usize>,
    /// Race this many backends concurrently instead of trying them in turn
    #[serde(default)]
    pub parallel: Option<usize>,
    /// Relative weights for the weighted strategy
    #[serde(default)]
    pub weights: IndexMap<String, f64>,
    /// Optional circuit breaker
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

const fn default_true() -> bool {
    true
}

/// How the router orders candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Rotate the first candidate on every dispatch
    #[default]
    RoundRobin,
    /// Always start from the first backend
    Priority,
    /// Uniformly shuffled order
    Random,
    /// Order sampled in proportion to `weights`
    Weighted,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` that open the circuit
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Sliding window for counting failures
    #[serde(default = "default_window", deserialize_with = "crate::duration::deserialize")]
    pub window: Duration,
    /// How long an open circuit waits before probing
    #[serde(default = "default_recovery", deserialize_with = "crate::duration::deserialize")]
    pub recovery: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            window: default_window(),
            recovery: default_recovery(),
        }
    }
}

const fn default_error_threshold() -> u32 {
    5
}

const fn default_window() -> Duration {
    Duration::from_secs(60)
}

const fn default_recovery() -> Duration {
    Duration::from_secs(30)
}
