//! Backend health tracking with a circuit breaker
//!
//! A backend that keeps failing within the configured window is marked open
//! and pushed to the back of the router's candidate order until the recovery
//! period elapses.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use conduit_config::CircuitBreakerConfig;
use conduit_ir::now_millis;
use dashmap::DashMap;

/// Circuit breaker state for a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing; deprioritized by the router
    Open,
    /// Recovery period elapsed; the next request probes the backend
    HalfOpen,
}

struct BackendHealth {
    /// Failures in the current window
    error_count: AtomicU32,
    /// Window start, unix millis
    window_start: AtomicU64,
    /// When the circuit opened, unix millis; 0 while closed
    opened_at: AtomicU64,
}

impl BackendHealth {
    fn new() -> Self {
        Self {
            error_count: AtomicU32::new(0),
            window_start: AtomicU64::new(now_millis()),
            opened_at: AtomicU64::new(0),
        }
    }
}

/// Per-backend failure counts shared by every dispatch through one router
pub struct HealthTracker {
    backends: DashMap<String, BackendHealth>,
    config: CircuitBreakerConfig,
}

impl HealthTracker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            backends: DashMap::new(),
            config,
        }
    }

    pub fn state(&self, backend: &str) -> CircuitState {
        let Some(health) = self.backends.get(backend) else {
            return CircuitState::Closed;
        };

        let opened_at = health.opened_at.load(Ordering::Relaxed);
        if opened_at == 0 {
            return CircuitState::Closed;
        }

        if now_millis().saturating_sub(opened_at) >= millis(self.config.recovery) {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Whether a backend should be tried ahead of open ones
    pub fn is_available(&self, backend: &str) -> bool {
        self.state(backend) != CircuitState::Open
    }

    pub fn record_success(&self, backend: &str) {
        let health = self
            .backends
            .entry(backend.to_owned())
            .or_insert_with(BackendHealth::new);

        if health.opened_at.swap(0, Ordering::Relaxed) != 0 {
            tracing::info!(backend, "circuit breaker closed");
        }
        health.error_count.store(0, Ordering::Relaxed);
        health.window_start.store(now_millis(), Ordering::Relaxed);
    }

    pub fn record_failure(&self, backend: &str) {
        let health = self
            .backends
            .entry(backend.to_owned())
            .or_insert_with(BackendHealth::new);

        let now = now_millis();
        let window_start = health.window_start.load(Ordering::Relaxed);

        let count = if now.saturating_sub(window_start) >= millis(self.config.window) {
            health.window_start.store(now, Ordering::Relaxed);
            health.error_count.store(1, Ordering::Relaxed);
            1
        } else {
            health.error_count.fetch_add(1, Ordering::Relaxed) + 1
        };

        if count >= self.config.error_threshold {
            // A failed half-open probe restarts the recovery period
            health.opened_at.store(now.max(1), Ordering::Relaxed);
            drop(health);
            tracing::warn!(backend, error_count = count, "circuit breaker opened");
        }
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
