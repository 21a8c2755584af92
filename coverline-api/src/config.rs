//! API Configuration Module
//!
//! Server, rate-limit and metrics settings. Configuration is loaded from
//! environment variables with defaults for development; unparseable values
//! fall back to the default and are logged.

use coverline_core::{ConfigError, RouteClass, UserTier};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// SERVER CONFIGURATION
// ============================================================================

/// Process-level settings for the HTTP server binary.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Directory for the LMDB remote cache tier. `None` runs memory-only.
    pub lmdb_path: Option<PathBuf>,
    pub lmdb_max_size_mb: usize,
    /// Interval of the idle rate-limit window sweeper.
    pub rate_limit_sweep_interval: Duration,
    /// Interval of the LMDB expired-entry purge.
    pub lmdb_purge_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            lmdb_path: None,
            lmdb_max_size_mb: 256,
            rate_limit_sweep_interval: Duration::from_secs(60),
            lmdb_purge_interval: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    /// Create AppConfig from environment variables.
    ///
    /// Environment variables:
    /// - `COVERLINE_API_BIND`: Listen host (default: 0.0.0.0)
    /// - `PORT` or `COVERLINE_API_PORT`: Listen port (default: 3000)
    /// - `COVERLINE_LMDB_PATH`: LMDB directory (unset = memory-only cache)
    /// - `COVERLINE_LMDB_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `COVERLINE_RATE_LIMIT_SWEEP_SECS`: Idle window sweep interval (default: 60)
    /// - `COVERLINE_LMDB_PURGE_SECS`: Expired LMDB entry purge interval (default: 300)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("COVERLINE_API_BIND").unwrap_or(defaults.host),
            port: env_parse("PORT")
                .or_else(|| env_parse("COVERLINE_API_PORT"))
                .unwrap_or(defaults.port),
            lmdb_path: std::env::var("COVERLINE_LMDB_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            lmdb_max_size_mb: env_parse("COVERLINE_LMDB_MAX_SIZE_MB")
                .unwrap_or(defaults.lmdb_max_size_mb),
            rate_limit_sweep_interval: env_parse("COVERLINE_RATE_LIMIT_SWEEP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_sweep_interval),
            lmdb_purge_interval: env_parse("COVERLINE_LMDB_PURGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lmdb_purge_interval),
        }
    }

    /// Resolve the listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "bind_addr".to_string(),
                value: addr.clone(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// RATE LIMIT POLICY
// ============================================================================

/// Requests allowed per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    limit: u32,
    window: Duration,
}

impl Quota {
    pub fn new(limit: u32, window: Duration) -> Result<Self, ConfigError> {
        if window.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "window".to_string(),
                value: "0".to_string(),
                reason: "rate-limit window must be positive".to_string(),
            });
        }
        Ok(Self { limit, window })
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Parse `"<limit>/<window_secs>"` or a bare `"<limit>"` (keeps `fallback`'s window).
pub fn parse_quota(value: &str, fallback: Quota) -> Result<Quota, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: "quota".to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let (limit, window) = match value.trim().split_once('/') {
        Some((limit, secs)) => {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| invalid("window must be whole seconds"))?;
            (limit, Duration::from_secs(secs))
        }
        None => (value.trim(), fallback.window),
    };
    let limit: u32 = limit
        .trim()
        .parse()
        .map_err(|_| invalid("limit must be a non-negative integer"))?;
    Quota::new(limit, window)
}

/// Quota table indexed by user tier and route class.
///
/// Defaults keep `enterprise >= pro >= free` within each route class, and
/// `save`/`generate` tighter than `general` within each tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    quotas: [[Quota; 3]; 3],
}

fn tier_index(tier: UserTier) -> usize {
    match tier {
        UserTier::Free => 0,
        UserTier::Pro => 1,
        UserTier::Enterprise => 2,
    }
}

fn class_index(class: RouteClass) -> usize {
    match class {
        RouteClass::General => 0,
        RouteClass::Save => 1,
        RouteClass::Generate => 2,
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            quotas: [
                // general, save, generate
                [Quota::per_minute(60), Quota::per_minute(3), Quota::per_minute(3)],
                [Quota::per_minute(300), Quota::per_minute(30), Quota::per_minute(20)],
                [Quota::per_minute(1000), Quota::per_minute(100), Quota::per_minute(60)],
            ],
        }
    }
}

impl RateLimitPolicy {
    /// Same quota for every cell.
    pub fn uniform(quota: Quota) -> Self {
        Self {
            quotas: [[quota; 3]; 3],
        }
    }

    pub fn quota(&self, tier: UserTier, class: RouteClass) -> Quota {
        self.quotas[tier_index(tier)][class_index(class)]
    }

    pub fn with_quota(mut self, tier: UserTier, class: RouteClass, quota: Quota) -> Self {
        self.quotas[tier_index(tier)][class_index(class)] = quota;
        self
    }

    /// Environment variable overriding one cell, e.g. `COVERLINE_RATE_LIMIT_FREE_SAVE`.
    pub fn env_key(tier: UserTier, class: RouteClass) -> String {
        format!(
            "COVERLINE_RATE_LIMIT_{}_{}",
            tier.as_str().to_uppercase(),
            class.as_str().to_uppercase()
        )
    }

    /// Create the policy from defaults plus per-cell environment overrides.
    ///
    /// Each override is `"<limit>/<window_secs>"` or `"<limit>"`.
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        for tier in UserTier::ALL {
            for class in RouteClass::ALL {
                let key = Self::env_key(tier, class);
                let Ok(raw) = std::env::var(&key) else {
                    continue;
                };
                match parse_quota(&raw, policy.quota(tier, class)) {
                    Ok(quota) => policy = policy.with_quota(tier, class, quota),
                    Err(e) => tracing::warn!(%key, error = %e, "Ignoring invalid rate-limit override"),
                }
            }
        }
        policy
    }
}

// ============================================================================
// METRICS CONFIGURATION
// ============================================================================

/// Bounds for the metrics recorder's rolling buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub sample_capacity: usize,
    pub sample_retention: Duration,
    pub activity_capacity: usize,
    pub activity_retention: Duration,
    /// Dashboard range used when a request does not name one.
    pub default_range: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_capacity: 10_000,
            sample_retention: Duration::from_secs(60 * 60),
            activity_capacity: 10_000,
            activity_retention: Duration::from_secs(24 * 60 * 60),
            default_range: Duration::from_secs(15 * 60),
        }
    }
}

impl MetricsConfig {
    /// Create MetricsConfig from environment variables.
    ///
    /// Environment variables:
    /// - `COVERLINE_METRICS_SAMPLE_CAPACITY` (default: 10000)
    /// - `COVERLINE_METRICS_SAMPLE_RETENTION_SECS` (default: 3600)
    /// - `COVERLINE_METRICS_ACTIVITY_CAPACITY` (default: 10000)
    /// - `COVERLINE_METRICS_ACTIVITY_RETENTION_SECS` (default: 86400)
    /// - `COVERLINE_METRICS_DEFAULT_RANGE_SECS` (default: 900)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sample_capacity: env_parse("COVERLINE_METRICS_SAMPLE_CAPACITY")
                .unwrap_or(defaults.sample_capacity),
            sample_retention: env_parse("COVERLINE_METRICS_SAMPLE_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sample_retention),
            activity_capacity: env_parse("COVERLINE_METRICS_ACTIVITY_CAPACITY")
                .unwrap_or(defaults.activity_capacity),
            activity_retention: env_parse("COVERLINE_METRICS_ACTIVITY_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.activity_retention),
            default_range: env_parse("COVERLINE_METRICS_DEFAULT_RANGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_range),
        }
    }
}
