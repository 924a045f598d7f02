//! Domain Entities - Core resilience objects
//!
//! These entities describe calls into the automation target and the
//! records the control plane keeps about them.

use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Parameter mapping for one operation.
///
/// `serde_json::Map` is ordered by key, so serializing it yields the
/// canonical encoding used for operation identity.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Identity of a cacheable or retryable call.
///
/// Two keys built from the same operation and the same parameters are equal
/// regardless of the order the parameters were inserted in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    /// Operation name (e.g. "today", "add-todo")
    pub operation: String,
    /// Canonical, key-sorted JSON encoding of the parameters
    pub params: String,
}

impl OperationKey {
    /// Build the key for an operation and its parameters.
    pub fn new(operation: &str, params: &Params) -> Self {
        Self {
            operation: operation.to_string(),
            params: canonical_params(params),
        }
    }

    /// Whether this key belongs to the given operation group.
    pub fn belongs_to(&self, operation: &str) -> bool {
        self.operation == operation
    }
}

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.operation, self.params)
    }
}

/// Canonical encoding of a parameter mapping.
pub fn canonical_params(params: &Params) -> String {
    // A map of JSON values always serializes; fall back to "{}" regardless.
    serde_json::to_string(params).unwrap_or_else(|_| "{}".to_string())
}

/// One cached result.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,
    /// When the entry was stored
    pub created_at: Instant,
    /// When the entry stops being served
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Shortest TTL accepted, so expiry is always after creation.
    pub const MIN_TTL: std::time::Duration = std::time::Duration::from_millis(1);

    /// Create an entry that expires `ttl` from now.
    pub fn new(value: V, ttl: std::time::Duration) -> Self {
        let created_at = Instant::now();
        Self {
            value,
            created_at,
            expires_at: created_at + ttl.max(Self::MIN_TTL),
        }
    }

    /// Whether the entry has expired at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Whether an operation only reads from the target or changes it.
///
/// Records written without a kind are treated as writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    #[default]
    Write,
}

/// A permanently failed operation, kept for inspection and replay.
///
/// Field names match the on-disk JSON array written by the dead letter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Record identifier handed back to the caller
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Operation name
    pub operation: String,
    /// Parameters the operation was called with
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub kind: OperationKind,
    /// Last error message
    pub error: String,
    /// Number of attempts made so far
    pub attempts: u32,
    /// Creation time, epoch seconds
    pub timestamp: f64,
    /// Creation time, human readable
    pub added_at: String,
}

impl DeadLetterEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(operation: &str, params: Params, error: impl Into<String>, attempts: u32) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4(),
            operation: operation.to_string(),
            params,
            kind: OperationKind::Write,
            error: error.into(),
            attempts,
            timestamp,
            added_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn with_kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Operation identity of this entry.
    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.operation, &self.params)
    }
}

/// Last known reachability of the automation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Whether the target answered
    pub reachable: bool,
    /// When the check ran
    pub checked_at: Instant,
}

impl ProbeResult {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable,
            checked_at: Instant::now(),
        }
    }

    /// Whether this result is older than `interval`.
    pub fn is_stale(&self, interval: std::time::Duration) -> bool {
        self.checked_at.elapsed() > interval
    }
}
