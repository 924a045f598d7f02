//! Retry Executor
//!
//! Runs one logical call against the automation target: gate on the
//! availability probe and the circuit breaker, throttle every attempt,
//! retry failures with exponential backoff and jitter, and dead-letter the
//! call when every attempt failed.

use crate::domain::entities::{DeadLetterEntry, OperationKind, Params};
use crate::domain::errors::{OperationError, ResilienceError};
use crate::infrastructure::availability_probe::AvailabilityProbe;
use crate::infrastructure::circuit_breaker::CircuitBreaker;
use crate::infrastructure::dead_letter_queue::DeadLetterQueue;
use crate::infrastructure::rate_limiter::RateLimiter;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Multiplicative jitter applied to each backoff delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterRange {
    pub min: f64,
    pub max: f64,
}

impl JitterRange {
    /// No randomness; delays are exactly `base_delay * 2^n`.
    pub const NONE: JitterRange = JitterRange { min: 1.0, max: 1.0 };

    /// Draw a factor uniformly from the range.
    pub fn sample(&self) -> f64 {
        if self.min >= self.max {
            self.min
        } else {
            rand::thread_rng().gen_range(self.min..=self.max)
        }
    }

    /// Whether the range can scale a delay.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min > 0.0 && self.min <= self.max
    }
}

impl Default for JitterRange {
    fn default() -> Self {
        Self { min: 0.8, max: 1.2 }
    }
}

/// Retry tunables for one logical call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included (0 behaves as 1)
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    pub jitter: JitterRange,
    /// How long to wait for the target before giving up
    pub availability_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: JitterRange::default(),
            availability_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterRange) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_availability_timeout(mut self, timeout: Duration) -> Self {
        self.availability_timeout = timeout;
        self
    }

    /// Number of attempts a call gets.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after the `failed_attempt`-th failure (1-based).
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent) * self.jitter.sample();

        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Where to record a call that exhausted its attempts.
#[derive(Debug, Clone, Copy)]
pub struct DeadLetterTarget<'a> {
    pub operation: &'a str,
    pub params: &'a Params,
    pub kind: OperationKind,
}

impl<'a> DeadLetterTarget<'a> {
    pub fn read(operation: &'a str, params: &'a Params) -> Self {
        Self {
            operation,
            params,
            kind: OperationKind::Read,
        }
    }

    pub fn write(operation: &'a str, params: &'a Params) -> Self {
        Self {
            operation,
            params,
            kind: OperationKind::Write,
        }
    }
}

/// Retrying front door to the automation target.
pub struct RetryExecutor {
    probe: Arc<AvailabilityProbe>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    dead_letters: Arc<DeadLetterQueue>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(
        probe: Arc<AvailabilityProbe>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        dead_letters: Arc<DeadLetterQueue>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            probe,
            limiter,
            breaker,
            dead_letters,
            policy,
        }
    }

    /// Run `operation` under the default policy.
    pub fn execute<T, F>(
        &self,
        dead_letter: Option<DeadLetterTarget<'_>>,
        operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Result<T, OperationError>,
    {
        self.execute_with(&self.policy, dead_letter, operation)
    }

    /// Run `operation` under `policy`.
    ///
    /// The probe and the breaker are consulted once, before the first
    /// attempt; a retry loop that has started runs to completion even if the
    /// breaker opens meanwhile.
    pub fn execute_with<T, F>(
        &self,
        policy: &RetryPolicy,
        dead_letter: Option<DeadLetterTarget<'_>>,
        mut operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Result<T, OperationError>,
    {
        let name = dead_letter.map(|t| t.operation).unwrap_or("operation");

        if !self.probe.wait_for_availability(policy.availability_timeout) {
            tracing::error!("automation target not available for {}", name);
            return Err(ResilienceError::TargetUnreachable {
                waited: policy.availability_timeout,
            });
        }

        if !self.breaker.allow_operation() {
            tracing::warn!("circuit breaker is open, blocking {}", name);
            return Err(ResilienceError::CircuitOpen);
        }

        let attempts = policy.attempts();
        let mut last_error = OperationError::NoResult;

        for attempt in 1..=attempts {
            self.limiter.wait_if_needed();

            match operation() {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}", name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    self.breaker.release_probe();
                    tracing::warn!("{} rejected without retry: {}", name, e);
                    return Err(ResilienceError::Rejected {
                        operation: name.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    self.breaker.record_failure();

                    if attempt < attempts {
                        let delay = policy.backoff_delay(attempt);
                        tracing::warn!(
                            "attempt {} of {} failed for {}, retrying in {:?}: {}",
                            attempt,
                            attempts,
                            name,
                            delay,
                            e
                        );
                        std::thread::sleep(delay);
                    }
                    last_error = e;
                }
            }
        }

        let last_error = last_error.to_string();
        tracing::error!(
            "all {} attempts failed for {}. last error: {}",
            attempts,
            name,
            last_error
        );

        let dead_letter_id = dead_letter.and_then(|target| self.dead_letter(target, &last_error, attempts));

        Err(ResilienceError::Exhausted {
            operation: name.to_string(),
            attempts,
            last_error,
            dead_letter_id,
        })
    }

    fn dead_letter(&self, target: DeadLetterTarget<'_>, error: &str, attempts: u32) -> Option<Uuid> {
        let entry = DeadLetterEntry::new(target.operation, target.params.clone(), error, attempts)
            .with_kind(target.kind);

        match self.dead_letters.add(entry) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!("failed to record {} in dead letter queue: {}", target.operation, e);
                None
            }
        }
    }

    /// Default policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }
}
