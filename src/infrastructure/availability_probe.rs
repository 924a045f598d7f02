//! Availability Probe
//!
//! Memoized reachability checks against the automation target.

use crate::domain::entities::ProbeResult;
use crate::domain::ports::ReachabilityCheck;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Minimum time between two real reachability checks
    pub recheck_interval: Duration,
    /// Sleep between polls in `wait_for_availability`
    pub poll_interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            recheck_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Availability probe for the automation target.
///
/// Caches the last answer so hot paths do not pay for a real check on every
/// call.
pub struct AvailabilityProbe {
    config: ProbeConfig,
    check: Arc<dyn ReachabilityCheck>,
    last: Mutex<Option<ProbeResult>>,
}

impl AvailabilityProbe {
    /// Create a new probe around a reachability backend.
    pub fn new(config: ProbeConfig, check: Arc<dyn ReachabilityCheck>) -> Self {
        Self {
            config,
            check,
            last: Mutex::new(None),
        }
    }

    /// Whether the target is reachable, re-checking at most once per interval.
    pub fn is_available(&self) -> bool {
        if let Some(result) = *self.last.lock() {
            if !result.is_stale(self.config.recheck_interval) {
                return result.reachable;
            }
        }

        // The backend may be slow; keep the lock out of it.
        let result = ProbeResult::new(self.check.is_reachable());

        let previous = self.last.lock().replace(result);
        match previous {
            Some(prev) if prev.reachable && !result.reachable => {
                tracing::warn!("automation target became unreachable");
            }
            Some(prev) if !prev.reachable && result.reachable => {
                tracing::info!("automation target reachable again");
            }
            None if !result.reachable => {
                tracing::warn!("automation target unreachable");
            }
            _ => {}
        }

        result.reachable
    }

    /// Poll until the target is reachable or `timeout` elapses.
    ///
    /// Always checks at least once.
    pub fn wait_for_availability(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_available() {
                return true;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!("gave up waiting for target after {:?}", timeout);
                return false;
            }

            std::thread::sleep(self.config.poll_interval.min(remaining));
        }
    }

    /// Last cached result, if any check has run.
    pub fn last_result(&self) -> Option<ProbeResult> {
        *self.last.lock()
    }

    /// Drop the cached result so the next call checks for real.
    pub fn invalidate(&self) {
        *self.last.lock() = None;
    }

    /// Get the configuration.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct CountingCheck {
        reachable: AtomicBool,
        calls: AtomicU32,
    }

    impl CountingCheck {
        fn new(reachable: bool) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                calls: AtomicU32::new(0),
            })
        }
    }

    impl ReachabilityCheck for CountingCheck {
        fn is_reachable(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reachable.load(Ordering::SeqCst)
        }
    }

    fn probe(check: Arc<CountingCheck>, recheck: Duration, poll: Duration) -> AvailabilityProbe {
        AvailabilityProbe::new(
            ProbeConfig {
                recheck_interval: recheck,
                poll_interval: poll,
            },
            check,
        )
    }

    #[test]
    fn test_probe_config_default() {
        let config = ProbeConfig::default();
        assert_eq!(config.recheck_interval, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_is_available_memoized() {
        let check = CountingCheck::new(true);
        let probe = probe(check.clone(), Duration::from_secs(60), Duration::from_millis(10));

        for _ in 0..10 {
            assert!(probe.is_available());
        }
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_available_rechecks_after_interval() {
        let check = CountingCheck::new(true);
        let probe = probe(check.clone(), Duration::from_millis(10), Duration::from_millis(10));

        assert!(probe.is_available());
        check.reachable.store(false, Ordering::SeqCst);

        // Still cached
        assert!(probe.is_available());

        std::thread::sleep(Duration::from_millis(30));
        assert!(!probe.is_available());
        assert_eq!(check.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closure_backend() {
        let probe = AvailabilityProbe::new(ProbeConfig::default(), Arc::new(|| true));
        assert!(probe.is_available());
        assert!(probe.last_result().unwrap().reachable);
    }

    #[test]
    fn test_wait_for_availability_immediate() {
        let check = CountingCheck::new(true);
        let probe = probe(check, Duration::from_secs(5), Duration::from_millis(10));

        let start = Instant::now();
        assert!(probe.wait_for_availability(Duration::from_secs(1)));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_wait_for_availability_times_out() {
        let check = CountingCheck::new(false);
        let probe = probe(check.clone(), Duration::ZERO, Duration::from_millis(10));

        let start = Instant::now();
        assert!(!probe.wait_for_availability(Duration::from_millis(60)));
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert!(check.calls.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_wait_for_availability_zero_timeout_checks_once() {
        let check = CountingCheck::new(false);
        let probe = probe(check.clone(), Duration::ZERO, Duration::from_millis(10));

        assert!(!probe.wait_for_availability(Duration::ZERO));
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_for_availability_recovers() {
        let check = CountingCheck::new(false);
        let probe = Arc::new(probe(check.clone(), Duration::ZERO, Duration::from_millis(5)));

        let flip = check.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            flip.reachable.store(true, Ordering::SeqCst);
        });

        assert!(probe.wait_for_availability(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_invalidate_forces_recheck() {
        let check = CountingCheck::new(true);
        let probe = probe(check.clone(), Duration::from_secs(60), Duration::from_millis(10));

        probe.is_available();
        probe.invalidate();
        assert!(probe.last_result().is_none());

        probe.is_available();
        assert_eq!(check.calls.load(Ordering::SeqCst), 2);
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_logs_reachability_change() {
        let check = CountingCheck::new(true);
        let probe = probe(check.clone(), Duration::ZERO, Duration::from_millis(10));

        probe.is_available();
        std::thread::sleep(Duration::from_millis(2));
        check.reachable.store(false, Ordering::SeqCst);
        probe.is_available();

        assert!(logs_contain("automation target became unreachable"));
    }
}
