//! Result Cache
//!
//! TTL cache for read-only operations against the automation target, with
//! invalidation by operation group.

use crate::domain::entities::{CacheEntry, OperationKey, Params};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-operation TTLs. Operations not listed use `default_ttl`.
#[derive(Debug, Clone)]
pub struct CacheTtlTable {
    pub default_ttl: Duration,
    pub ttls: HashMap<String, Duration>,
}

impl CacheTtlTable {
    /// Create an empty table with the given default.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            ttls: HashMap::new(),
        }
    }

    /// Builder-style TTL override for one operation.
    pub fn with(mut self, operation: &str, ttl: Duration) -> Self {
        self.ttls.insert(operation.to_string(), ttl);
        self
    }

    /// TTL for an operation.
    pub fn ttl_for(&self, operation: &str) -> Duration {
        self.ttls.get(operation).copied().unwrap_or(self.default_ttl)
    }
}

impl Default for CacheTtlTable {
    /// Five minutes for everything; per-view TTLs come from the config.
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// Hit percentage in [0, 100]
    pub hit_rate: f64,
}

/// TTL cache keyed by operation identity.
///
/// Entries are removed only when they expire or are invalidated; there is no
/// size-based eviction.
pub struct ResultCache<V = serde_json::Value> {
    entries: DashMap<OperationKey, CacheEntry<V>>,
    ttl_table: CacheTtlTable,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    /// Create a new cache.
    pub fn new(ttl_table: CacheTtlTable) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_table,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached result.
    ///
    /// An expired entry is evicted and counted as a miss.
    pub fn get(&self, operation: &str, params: &Params) -> Option<V> {
        let key = OperationKey::new(operation, params);
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired_at(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("cache hit for {}", key);
                return Some(entry.value.clone());
            }
        }

        if self
            .entries
            .remove_if(&key, |_, entry| entry.is_expired_at(now))
            .is_some()
        {
            tracing::debug!("cache entry expired for {}", key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a result.
    ///
    /// `ttl` overrides the per-operation TTL from the table.
    pub fn set(&self, operation: &str, params: &Params, value: V, ttl: Option<Duration>) {
        let key = OperationKey::new(operation, params);
        let ttl = ttl.unwrap_or_else(|| self.ttl_table.ttl_for(operation));

        tracing::debug!("cache set for {}, ttl {:?}", key, ttl);
        self.entries.insert(key, CacheEntry::new(value, ttl));
    }

    /// Invalidate cached results.
    ///
    /// - no operation: clear everything
    /// - operation only: clear every entry of that operation
    /// - operation and params: clear exactly that entry
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, operation: Option<&str>, params: Option<&Params>) -> usize {
        match (operation, params) {
            (Some(operation), Some(params)) => {
                let key = OperationKey::new(operation, params);
                let removed = self.entries.remove(&key).is_some() as usize;
                if removed > 0 {
                    tracing::debug!("invalidated cache entry {}", key);
                }
                removed
            }
            (Some(operation), None) => {
                let mut removed = 0;
                self.entries.retain(|key, _| {
                    let keep = !key.belongs_to(operation);
                    removed += usize::from(!keep);
                    keep
                });
                tracing::debug!("invalidated {} cache entries for {}", removed, operation);
                removed
            }
            (None, _) => {
                let mut removed = 0;
                self.entries.retain(|_, _| {
                    removed += 1;
                    false
                });
                tracing::info!("cleared entire cache ({} entries)", removed);
                removed
            }
        }
    }

    /// Invalidate every entry of each listed operation.
    pub fn invalidate_operations<S: AsRef<str>>(&self, operations: &[S]) -> usize {
        operations
            .iter()
            .map(|op| self.invalidate(Some(op.as_ref()), None))
            .sum()
    }

    /// Remove expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired_at(now);
            removed += usize::from(!keep);
            keep
        });

        if removed > 0 {
            tracing::debug!("cleaned up {} expired cache entries", removed);
        }

        removed
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            hits as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };

        CacheStats {
            entries: self.entries.len(),
            hits,
            misses,
            total_requests,
            hit_rate,
        }
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// TTL table used when `set` gets no explicit TTL.
    pub fn ttl_table(&self) -> &CacheTtlTable {
        &self.ttl_table
    }
}

impl<V: Clone + Send + Sync + 'static> ResultCache<V> {
    /// Start the periodic expiry sweep on the current tokio runtime.
    ///
    /// Abort the returned handle to stop it.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start_cleanup_with_arc(
        cache: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                cache.cleanup_expired();
            }
        })
    }
}

impl<V: Clone> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(CacheTtlTable::default())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    fn empty() -> Params {
        Params::new()
    }

    // ===== TTL Table Tests =====

    #[test]
    fn test_ttl_table_default() {
        let table = CacheTtlTable::default();
        assert!(table.ttls.is_empty());
        assert_eq!(table.ttl_for("today"), Duration::from_secs(300));
        assert_eq!(table.ttl_for("unknown"), Duration::from_secs(300));
    }

    #[test]
    fn test_ttl_table_override() {
        let table = CacheTtlTable::default().with("today", Duration::from_secs(30));
        assert_eq!(table.ttl_for("today"), Duration::from_secs(30));
        assert_eq!(table.ttl_for("inbox"), Duration::from_secs(300));
    }

    // ===== Get / Set Tests =====

    #[test]
    fn test_set_and_get() {
        let cache: ResultCache<String> = ResultCache::default();
        cache.set("today", &empty(), "A".to_string(), None);

        assert_eq!(cache.get("today", &empty()), Some("A".to_string()));
    }

    #[test]
    fn test_get_missing() {
        let cache: ResultCache<String> = ResultCache::default();
        assert!(cache.get("today", &empty()).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_get_after_ttl_is_miss() {
        let cache: ResultCache<String> = ResultCache::default();
        cache.set("today", &empty(), "A".to_string(), Some(Duration::from_secs(1)));

        assert_eq!(cache.get("today", &empty()), Some("A".to_string()));

        std::thread::sleep(Duration::from_millis(1100));

        assert!(cache.get("today", &empty()).is_none());
        // Expired entry was evicted by the lookup
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_set_overwrites() {
        let cache: ResultCache<u32> = ResultCache::default();
        cache.set("today", &empty(), 1, None);
        cache.set("today", &empty(), 2, None);

        assert_eq!(cache.get("today", &empty()), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_params_order_does_not_matter() {
        let cache: ResultCache<u32> = ResultCache::default();

        let mut a = Params::new();
        a.insert("period".into(), json!("7d"));
        a.insert("limit".into(), json!(50));
        let mut b = Params::new();
        b.insert("limit".into(), json!(50));
        b.insert("period".into(), json!("7d"));

        cache.set("logbook", &a, 7, None);
        assert_eq!(cache.get("logbook", &b), Some(7));
    }

    #[test]
    fn test_ttl_table_used_when_no_ttl_given() {
        let table = CacheTtlTable::new(Duration::from_secs(300)).with("today", Duration::from_millis(20));
        let cache: ResultCache<u32> = ResultCache::new(table);

        cache.set("today", &empty(), 1, None);
        cache.set("areas", &empty(), 2, None);

        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("today", &empty()).is_none());
        assert_eq!(cache.get("areas", &empty()), Some(2));
    }

    // ===== Invalidation Tests =====

    #[test]
    fn test_invalidate_operation_scope() {
        let cache: ResultCache<String> = ResultCache::default();
        cache.set("today", &empty(), "A".to_string(), None);
        cache.set("inbox", &empty(), "B".to_string(), None);

        let removed = cache.invalidate(Some("today"), None);

        assert_eq!(removed, 1);
        assert!(cache.get("today", &empty()).is_none());
        assert_eq!(cache.get("inbox", &empty()), Some("B".to_string()));
    }

    #[test]
    fn test_invalidate_operation_removes_all_param_variants() {
        let cache: ResultCache<u32> = ResultCache::default();
        cache.set("tagged", &params(json!({"tag": "work"})), 1, None);
        cache.set("tagged", &params(json!({"tag": "home"})), 2, None);
        cache.set("tags", &empty(), 3, None);

        assert_eq!(cache.invalidate(Some("tagged"), None), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("tags", &empty()), Some(3));
    }

    #[test]
    fn test_invalidate_single_entry() {
        let cache: ResultCache<u32> = ResultCache::default();
        let work = params(json!({"tag": "work"}));
        let home = params(json!({"tag": "home"}));
        cache.set("tagged", &work, 1, None);
        cache.set("tagged", &home, 2, None);

        assert_eq!(cache.invalidate(Some("tagged"), Some(&work)), 1);
        assert!(cache.get("tagged", &work).is_none());
        assert_eq!(cache.get("tagged", &home), Some(2));

        // Already gone
        assert_eq!(cache.invalidate(Some("tagged"), Some(&work)), 0);
    }

    #[test]
    fn test_invalidate_everything() {
        let cache: ResultCache<u32> = ResultCache::default();
        cache.set("today", &empty(), 1, None);
        cache.set("inbox", &empty(), 2, None);
        cache.set("areas", &empty(), 3, None);

        assert_eq!(cache.invalidate(None, None), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_operations() {
        let cache: ResultCache<u32> = ResultCache::default();
        cache.set("today", &empty(), 1, None);
        cache.set("inbox", &empty(), 2, None);
        cache.set("areas", &empty(), 3, None);

        assert_eq!(cache.invalidate_operations(&["today", "inbox"]), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_count_ignores_concurrent_inserts() {
        use std::thread;

        let cache: Arc<ResultCache<usize>> = Arc::new(ResultCache::default());
        for n in 0..500 {
            cache.set("tagged", &params(json!({ "n": n })), n, None);
        }

        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for n in 0..2000 {
                    cache.set("today", &params(json!({ "n": n })), n, None);
                }
            })
        };

        let removed = cache.invalidate(Some("tagged"), None);
        writer.join().unwrap();

        assert_eq!(removed, 500);
        assert_eq!(cache.len(), 2000);
    }

    // ===== Cleanup Tests =====

    #[test]
    fn test_cleanup_expired() {
        let cache: ResultCache<u32> = ResultCache::default();
        cache.set("today", &empty(), 1, Some(Duration::from_millis(5)));
        cache.set("inbox", &empty(), 2, Some(Duration::from_millis(5)));
        cache.set("areas", &empty(), 3, Some(Duration::from_secs(60)));

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[test]
    fn test_cleanup_count_ignores_concurrent_inserts() {
        use std::thread;

        let cache: Arc<ResultCache<usize>> = Arc::new(ResultCache::default());
        for n in 0..500 {
            cache.set("today", &params(json!({ "n": n })), n, Some(Duration::from_millis(1)));
        }
        std::thread::sleep(Duration::from_millis(10));

        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for n in 0..2000 {
                    cache.set("inbox", &params(json!({ "n": n })), n, None);
                }
            })
        };

        let removed = cache.cleanup_expired();
        writer.join().unwrap();

        assert_eq!(removed, 500);
        assert_eq!(cache.len(), 2000);
    }

    #[tokio::test]
    async fn test_background_sweep() {
        let cache: Arc<ResultCache<u32>> = Arc::new(ResultCache::default());
        cache.set("today", &empty(), 1, Some(Duration::from_millis(5)));

        let handle = ResultCache::start_cleanup_with_arc(cache.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        assert!(cache.is_empty());
        // The sweep does not touch hit/miss counters
        assert_eq!(cache.stats().total_requests, 0);
    }

    // ===== Stats Tests =====

    #[test]
    fn test_stats() {
        let cache: ResultCache<u32> = ResultCache::default();
        assert_eq!(cache.stats().hit_rate, 0.0);

        cache.set("today", &empty(), 1, None);
        cache.get("today", &empty());
        cache.get("today", &empty());
        cache.get("today", &empty());
        cache.get("inbox", &empty());

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_requests, 4);
        assert!((stats.hit_rate - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let cache: Arc<ResultCache<usize>> = Arc::new(ResultCache::default());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let p = params(json!({ "worker": i }));
                    for n in 0..100 {
                        cache.set("today", &p, n, None);
                        assert!(cache.get("today", &p).is_some());
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 8);
        assert_eq!(cache.stats().hits, 800);
    }
}
