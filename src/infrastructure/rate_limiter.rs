//! Rate Limiter
//!
//! Fixed-interval throttle in front of the automation target.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum operations per minute (0 disables throttling)
    pub operations_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            operations_per_minute: 30,
        }
    }
}

impl RateLimitConfig {
    /// Minimum spacing between two operations.
    pub fn interval(&self) -> Duration {
        if self.operations_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / self.operations_per_minute
        }
    }
}

/// Fixed-interval rate limiter.
///
/// Every operation, successful or not, consumes one slot. There is no burst
/// capacity: consecutive slots are always at least one interval apart.
pub struct RateLimiter {
    config: RateLimitConfig,
    interval: Duration,
    /// Instant of the last granted slot
    last_operation: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        let interval = config.interval();
        Self {
            config,
            interval,
            last_operation: Mutex::new(None),
        }
    }

    /// Reserve the next slot without waiting.
    ///
    /// Returns the instant at which the caller may proceed.
    fn reserve(&self) -> Instant {
        let mut last = self.last_operation.lock();
        let now = Instant::now();

        let slot = match *last {
            Some(prev) => (prev + self.interval).max(now),
            None => now,
        };
        *last = Some(slot);
        slot
    }

    /// Block until this caller's slot comes up.
    ///
    /// The slot is reserved under the lock and the sleep happens outside it,
    /// so concurrent callers queue up one interval apart. Returns how long
    /// the caller waited.
    pub fn wait_if_needed(&self) -> Duration {
        let slot = self.reserve();
        let wait = slot.saturating_duration_since(Instant::now());

        if !wait.is_zero() {
            tracing::debug!("rate limiter delaying operation by {:?}", wait);
            std::thread::sleep(wait);
        }

        wait
    }

    /// Run `operation` once its slot comes up.
    pub fn throttle<T, F>(&self, operation: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.wait_if_needed();
        operation()
    }

    /// Time until a call made now would be allowed to proceed.
    pub fn time_until_next(&self) -> Duration {
        match *self.last_operation.lock() {
            Some(prev) => (prev + self.interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Minimum spacing between operations.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Get the configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Forget the last operation so the next call proceeds immediately.
    pub fn clear(&self) {
        *self.last_operation.lock() = None;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
