//! Circuit Breaker Pattern
//!
//! Stops calling the automation target while it keeps failing, then lets a
//! single probe through once the recovery timeout has passed.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is let through
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - calls allowed
    #[default]
    Closed,
    /// Circuit tripped - calls fail fast
    Open,
    /// Testing recovery - one probe allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Consecutive failures while closed
    failures: u32,
    last_failure: Option<Instant>,
    /// Whether the half-open probe has been handed out
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker guarding the automation target.
///
/// All transitions happen under one lock, so concurrent callers observe a
/// consistent state machine.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState::new()),
        }
    }

    /// Check if a new operation may be attempted.
    ///
    /// Returns false while open and cooling down, and while a half-open probe
    /// is still outstanding.
    pub fn allow_operation(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map(|at| at.elapsed() > self.config.recovery_timeout)
                    .unwrap_or(true);

                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!("circuit breaker half-open, testing target recovery");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.probe_in_flight = false;
                tracing::info!("circuit breaker closed (target recovered)");
            }
            CircuitState::Closed => {
                inner.failures = 0;
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
            }
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                inner.last_failure = Some(now);

                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        "circuit breaker opened after {} consecutive failures",
                        inner.failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.last_failure = Some(now);
                inner.probe_in_flight = false;
                tracing::warn!("circuit breaker re-opened (probe failed)");
            }
            CircuitState::Open => {
                // Extend the cooldown
                inner.last_failure = Some(now);
            }
        }
    }

    /// Hand back a half-open probe that ended without saying anything about
    /// the target (e.g. the call was rejected as invalid input).
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get a metrics snapshot.
    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.inner.lock();
        CircuitMetrics {
            state: inner.state,
            failures: inner.failures,
            failure_threshold: self.config.failure_threshold,
            since_last_failure_ms: inner.last_failure.map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Manually reset the circuit to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerState::new();
        tracing::info!("circuit breaker manually reset");
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Metrics for the circuit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failures: u32,
    pub failure_threshold: u32,
    pub since_last_failure_ms: Option<u64>,
}
