//! Infrastructure Layer
//!
//! The resilience components that sit between callers and the automation target.

pub mod availability_probe;
pub mod circuit_breaker;
pub mod dead_letter_queue;
pub mod rate_limiter;
pub mod result_cache;
pub mod retry_executor;

pub use availability_probe::{AvailabilityProbe, ProbeConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use dead_letter_queue::{DeadLetterQueue, ReplayReport};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use result_cache::{CacheStats, CacheTtlTable, ResultCache};
pub use retry_executor::{DeadLetterTarget, JitterRange, RetryExecutor, RetryPolicy};
