//! Resilience Context - Main application use case
//!
//! Owns one instance of every resilience component plus the executor and
//! routes reads and writes through them. Hosts build it once at startup and
//! share it behind an `Arc`.

use crate::config::Config;
use crate::domain::entities::{OperationKind, Params};
use crate::domain::errors::ResilienceError;
use crate::domain::ports::{Executor, ReachabilityCheck};
use crate::infrastructure::{
    AvailabilityProbe, CacheStats, CircuitBreaker, CircuitMetrics, DeadLetterQueue,
    DeadLetterTarget, RateLimiter, ReplayReport, ResultCache, RetryExecutor,
};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Aggregated view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub cache: CacheStats,
    pub breaker: CircuitMetrics,
    pub dead_letters: usize,
}

/// Resilience context - main application use case.
///
/// Reads are served from the result cache when possible. Everything else
/// goes through the retry executor:
/// 1. Waits for the availability probe
/// 2. Checks the circuit breaker
/// 3. Throttles and invokes the executor, retrying with backoff
/// 4. Dead-letters the call when every attempt failed
pub struct ResilienceContext {
    executor: Arc<dyn Executor>,
    cache: Arc<ResultCache>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    probe: Arc<AvailabilityProbe>,
    dead_letters: Arc<DeadLetterQueue>,
    retry: RetryExecutor,
    invalidations: HashMap<String, Vec<String>>,
    sweeper: Option<JoinHandle<()>>,
}

impl ResilienceContext {
    /// Wire a context from `config` around an already opened dead letter queue.
    pub fn new(
        config: &Config,
        executor: Arc<dyn Executor>,
        check: Arc<dyn ReachabilityCheck>,
        dead_letters: DeadLetterQueue,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(config.ttl_table()));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_config()));
        let probe = Arc::new(AvailabilityProbe::new(config.probe_config(), check));
        let dead_letters = Arc::new(dead_letters);

        let retry = RetryExecutor::new(
            probe.clone(),
            limiter.clone(),
            breaker.clone(),
            dead_letters.clone(),
            config.retry_policy(),
        );

        Self {
            executor,
            cache,
            breaker,
            limiter,
            probe,
            dead_letters,
            retry,
            invalidations: config.invalidations.clone(),
            sweeper: None,
        }
    }

    /// Validate `config`, open its dead letter file and wire a context.
    ///
    /// Inside a tokio runtime the cache sweeper starts as well, every
    /// `cache.sweep_interval_secs` (0 disables it). It stops when the
    /// context is dropped.
    pub fn open(
        config: &Config,
        executor: Arc<dyn Executor>,
        check: Arc<dyn ReachabilityCheck>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid resilience config")?;

        let dead_letters = match &config.dlq_path {
            Some(path) => DeadLetterQueue::open(path)
                .with_context(|| format!("failed to open dead letter queue {}", path.display()))?,
            None => DeadLetterQueue::in_memory(),
        };

        tracing::info!(
            "resilience context ready (failure_threshold={}, operations_per_minute={}, dead_letters={})",
            config.breaker.failure_threshold,
            config.rate_limit.operations_per_minute,
            dead_letters.len()
        );

        let mut ctx = Self::new(config, executor, check, dead_letters);

        let interval = config.sweep_interval();
        if !interval.is_zero() && tokio::runtime::Handle::try_current().is_ok() {
            tracing::debug!("starting cache sweeper every {:?}", interval);
            ctx.sweeper = Some(ctx.start_cache_sweeper(interval));
        }

        Ok(ctx)
    }

    /// Run a read-only operation, serving it from the cache when fresh.
    pub fn read(&self, operation: &str, params: &Params) -> Result<Value, ResilienceError> {
        let _span = tracing::info_span!("read", operation).entered();

        if let Some(value) = self.cache.get(operation, params) {
            return Ok(value);
        }

        let value = self.retry.execute(Some(DeadLetterTarget::read(operation, params)), || {
            self.executor.execute(operation, params)
        })?;

        self.cache.set(operation, params, value.clone(), None);
        Ok(value)
    }

    /// Run a mutating operation and drop the cached reads it makes stale.
    pub fn write(&self, operation: &str, params: &Params) -> Result<Value, ResilienceError> {
        let _span = tracing::info_span!("write", operation).entered();

        let value = self.retry.execute(Some(DeadLetterTarget::write(operation, params)), || {
            self.executor.execute(operation, params)
        })?;

        self.invalidate_after(operation);
        Ok(value)
    }

    /// Unmapped writes clear the whole cache.
    fn invalidate_after(&self, operation: &str) {
        let removed = match self.invalidations.get(operation) {
            Some(reads) => self.cache.invalidate_operations(reads),
            None => self.cache.invalidate(None, None),
        };

        if removed > 0 {
            tracing::debug!("{} invalidated {} cached results", operation, removed);
        }
    }

    /// Replay every dead letter once through the normal retry path.
    ///
    /// Entries that fail again stay queued and are not dead-lettered twice.
    /// A replayed read refreshes its cached result, a replayed write
    /// invalidates like `write`.
    pub fn replay_dead_letters(&self) -> ReplayReport {
        let _span = tracing::info_span!("replay_dead_letters").entered();

        let report = self.dead_letters.retry_all(|entry| {
            let result = self.retry.execute(None, || {
                self.executor.execute(&entry.operation, &entry.params)
            });

            match result {
                Ok(value) => {
                    match entry.kind {
                        OperationKind::Read => {
                            self.cache.set(&entry.operation, &entry.params, value, None)
                        }
                        OperationKind::Write => self.invalidate_after(&entry.operation),
                    }
                    Ok(())
                }
                Err(ResilienceError::Exhausted { last_error, .. }) => Err(last_error),
                Err(e) => Err(e.to_string()),
            }
        });

        tracing::info!(
            "dead letter replay: {} retried, {} succeeded, {} failed",
            report.retried,
            report.succeeded,
            report.failed
        );

        report
    }

    /// Drop cached results; `None` clears everything.
    pub fn invalidate(&self, operation: Option<&str>, params: Option<&Params>) -> usize {
        self.cache.invalidate(operation, params)
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            cache: self.cache.stats(),
            breaker: self.breaker.metrics(),
            dead_letters: self.dead_letters.len(),
        }
    }

    /// Start the periodic cache expiry sweep on the current tokio runtime.
    ///
    /// The caller owns the returned handle; `open` keeps its own.
    pub fn start_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        ResultCache::start_cleanup_with_arc(self.cache.clone(), interval)
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn probe(&self) -> &Arc<AvailabilityProbe> {
        &self.probe
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Whether `open` started a cache sweeper that is still running.
    pub fn has_cache_sweeper(&self) -> bool {
        self.sweeper.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ResilienceContext {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}
