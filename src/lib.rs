//! script-gate Library
//!
//! Resilience and caching layer for calls into a slow, occasionally
//! unavailable local automation target: result cache, circuit breaker,
//! rate limiter, availability probe, retry executor and dead letter queue.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;

// Re-export commonly used types
pub use application::{ContextStats, ResilienceContext};
pub use config::{load_config, Config, ConfigError};
pub use domain::entities::{DeadLetterEntry, OperationKey, OperationKind, Params};
pub use domain::errors::{DeadLetterError, OperationError, ResilienceError};
pub use domain::ports::{Executor, ReachabilityCheck};
pub use infrastructure::{
    AvailabilityProbe, CircuitBreaker, CircuitState, DeadLetterQueue, RateLimiter, ReplayReport,
    ResultCache, RetryExecutor, RetryPolicy,
};
pub use logging::init_logging;
