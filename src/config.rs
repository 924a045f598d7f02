use crate::infrastructure::{
    CacheTtlTable, CircuitBreakerConfig, JitterRange, ProbeConfig, RateLimitConfig, RetryPolicy,
};
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SCRIPT_GATE_";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub breaker: BreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub retry: RetrySettings,
    pub probe: ProbeSettings,
    pub cache: CacheSettings,
    /// Write operation -> read operations whose cached results it makes stale
    pub invalidations: HashMap<String, Vec<String>>,
    /// Dead letter file; `None` keeps dead letters in memory only
    pub dlq_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitSettings {
    pub operations_per_minute: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_min: f64,
    pub jitter_max: f64,
    pub availability_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeSettings {
    pub recheck_interval_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    /// Per-operation TTL overrides
    pub ttls: HashMap<String, u64>,
    /// Expiry sweep period for contexts opened inside a runtime (0 disables it)
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("failure threshold must be at least 1")]
    ZeroFailureThreshold,
    #[error("jitter range {min}..={max} must be positive and ordered")]
    InvalidJitter { min: f64, max: f64 },
    #[error("probe poll interval must be non-zero")]
    ZeroPollInterval,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            breaker: BreakerSettings::default(),
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            probe: ProbeSettings::default(),
            cache: CacheSettings::default(),
            invalidations: default_invalidations(),
            dlq_path: Some(PathBuf::from("script_gate_dlq.json")),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            operations_per_minute: 30,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_min: 0.8,
            jitter_max: 1.2,
            availability_timeout_secs: 5,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            recheck_interval_secs: 5,
            poll_interval_ms: 500,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        let ttls = [
            ("inbox", 30),
            ("today", 30),
            ("upcoming", 60),
            ("anytime", 300),
            ("someday", 300),
            ("projects", 300),
            ("areas", 600),
            ("tags", 600),
            ("logbook", 300),
            ("trash", 300),
        ]
        .into_iter()
        .map(|(op, secs)| (op.to_string(), secs))
        .collect();

        Self {
            default_ttl_secs: 300,
            ttls,
            sweep_interval_secs: 60,
        }
    }
}

fn default_invalidations() -> HashMap<String, Vec<String>> {
    [
        ("add-todo", &["inbox", "today", "upcoming"][..]),
        ("add-project", &["projects"][..]),
        ("update-project", &["projects"][..]),
        ("delete-project", &["projects", "trash"][..]),
    ]
    .into_iter()
    .map(|(write, reads)| (write.to_string(), reads.iter().map(|r| r.to_string()).collect()))
    .collect()
}

impl Config {
    /// Load a config from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }

        let jitter = self.jitter();
        if !jitter.is_valid() {
            return Err(ConfigError::InvalidJitter {
                min: jitter.min,
                max: jitter.max,
            });
        }

        if self.probe.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        Ok(())
    }

    fn jitter(&self) -> JitterRange {
        JitterRange {
            min: self.retry.jitter_min,
            max: self.retry.jitter_max,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            recovery_timeout: Duration::from_secs(self.breaker.recovery_timeout_secs),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            operations_per_minute: self.rate_limit.operations_per_minute,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.jitter(),
            availability_timeout: Duration::from_secs(self.retry.availability_timeout_secs),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            recheck_interval: Duration::from_secs(self.probe.recheck_interval_secs),
            poll_interval: Duration::from_millis(self.probe.poll_interval_ms),
        }
    }

    pub fn ttl_table(&self) -> CacheTtlTable {
        self.cache
            .ttls
            .iter()
            .fold(
                CacheTtlTable::new(Duration::from_secs(self.cache.default_ttl_secs)),
                |table, (op, secs)| table.with(op, Duration::from_secs(*secs)),
            )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build a config from `lookup` (normally the process environment).
///
/// Unparsable numbers fall back to the default; malformed TTL or
/// invalidation tables are errors.
pub fn load_config_from<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
    let num = |name: &str, default: u64| -> u64 {
        var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    };
    let float = |name: &str, default: f64| -> f64 {
        var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    };
    let num32 = |name: &str, default: u32| -> u32 {
        var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
    };

    let defaults = Config::default();

    let debug = var("DEBUG")
        .or_else(|| lookup("DEBUG"))
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let breaker = BreakerSettings {
        failure_threshold: num32("FAILURE_THRESHOLD", defaults.breaker.failure_threshold),
        recovery_timeout_secs: num("RECOVERY_TIMEOUT_SECS", defaults.breaker.recovery_timeout_secs),
    };

    let rate_limit = RateLimitSettings {
        operations_per_minute: num32(
            "OPERATIONS_PER_MINUTE",
            defaults.rate_limit.operations_per_minute,
        ),
    };

    let retry = RetrySettings {
        max_retries: num32("MAX_RETRIES", defaults.retry.max_retries),
        base_delay_ms: num("BASE_DELAY_MS", defaults.retry.base_delay_ms),
        max_delay_ms: num("MAX_DELAY_MS", defaults.retry.max_delay_ms),
        jitter_min: float("JITTER_MIN", defaults.retry.jitter_min),
        jitter_max: float("JITTER_MAX", defaults.retry.jitter_max),
        availability_timeout_secs: num(
            "AVAILABILITY_TIMEOUT_SECS",
            defaults.retry.availability_timeout_secs,
        ),
    };

    let probe = ProbeSettings {
        recheck_interval_secs: num("RECHECK_INTERVAL_SECS", defaults.probe.recheck_interval_secs),
        poll_interval_ms: num("POLL_INTERVAL_MS", defaults.probe.poll_interval_ms),
    };

    let mut cache = CacheSettings {
        default_ttl_secs: num("CACHE_DEFAULT_TTL_SECS", defaults.cache.default_ttl_secs),
        sweep_interval_secs: num("CACHE_SWEEP_INTERVAL_SECS", defaults.cache.sweep_interval_secs),
        ..defaults.cache
    };
    if let Some(raw) = var("CACHE_TTLS") {
        cache.ttls.extend(parse_ttls(&raw)?);
    }

    let invalidations = match var("INVALIDATIONS") {
        Some(raw) => parse_invalidations(&raw)?,
        None => defaults.invalidations,
    };

    let dlq_path = match var("DLQ_PATH") {
        Some(path) if path.trim().is_empty() => None,
        Some(path) => Some(PathBuf::from(path)),
        None => defaults.dlq_path,
    };

    Ok(Config {
        debug,
        breaker,
        rate_limit,
        retry,
        probe,
        cache,
        invalidations,
        dlq_path,
    })
}

/// Parse `name=secs,name=secs`.
fn parse_ttls(raw: &str) -> Result<HashMap<String, u64>, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: format!("{}CACHE_TTLS", ENV_PREFIX),
        value: raw.to_string(),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (op, secs) = pair.split_once('=').ok_or_else(invalid)?;
            let op = op.trim();
            if op.is_empty() {
                return Err(invalid());
            }
            let secs = secs.trim().parse().map_err(|_| invalid())?;
            Ok((op.to_string(), secs))
        })
        .collect()
}

/// Parse `write:read|read;write:read`.
fn parse_invalidations(raw: &str) -> Result<HashMap<String, Vec<String>>, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: format!("{}INVALIDATIONS", ENV_PREFIX),
        value: raw.to_string(),
    };

    raw.split(';')
        .map(str::trim)
        .filter(|rule| !rule.is_empty())
        .map(|rule| {
            let (write, reads) = rule.split_once(':').ok_or_else(invalid)?;
            let write = write.trim();
            if write.is_empty() {
                return Err(invalid());
            }
            let reads = reads
                .split('|')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
            Ok((write.to_string(), reads))
        })
        .collect()
}
