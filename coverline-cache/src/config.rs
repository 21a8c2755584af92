//! Cache configuration and per-tier TTLs.

use std::time::Duration;

/// Time-to-live for each tier of one write.
///
/// The memory TTL is clamped to the remote TTL on construction, so a value
/// can never outlive its shared copy in the process-local tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTtl {
    memory: Duration,
    remote: Duration,
}

impl TierTtl {
    pub fn new(memory: Duration, remote: Duration) -> Self {
        Self {
            memory: memory.min(remote),
            remote,
        }
    }

    /// Same TTL in both tiers.
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            memory: ttl,
            remote: ttl,
        }
    }

    pub fn memory(&self) -> Duration {
        self.memory
    }

    pub fn remote(&self) -> Duration {
        self.remote
    }
}

/// Configuration for the multi-level cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries in the memory tier.
    pub memory_capacity: usize,
    /// Upper bound for any memory-tier TTL, including backfills.
    pub memory_max_ttl: Duration,
    /// Bound on every remote-tier call.
    pub remote_timeout: Duration,
    /// TTLs used when a caller has no opinion.
    pub default_ttl: TierTtl,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 10_000,
            memory_max_ttl: Duration::from_secs(300),
            remote_timeout: Duration::from_millis(250),
            default_ttl: TierTtl::new(Duration::from_secs(60), Duration::from_secs(600)),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `COVERLINE_CACHE_*` environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let memory_capacity = std::env::var("COVERLINE_CACHE_MEMORY_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.memory_capacity);

        let memory_max_ttl = env_millis("COVERLINE_CACHE_MEMORY_MAX_TTL_MS")
            .unwrap_or(defaults.memory_max_ttl);

        let remote_timeout = env_millis("COVERLINE_CACHE_REMOTE_TIMEOUT_MS")
            .unwrap_or(defaults.remote_timeout);

        let memory_ttl = env_millis("COVERLINE_CACHE_MEMORY_TTL_MS")
            .unwrap_or(defaults.default_ttl.memory());

        let remote_ttl = env_millis("COVERLINE_CACHE_REMOTE_TTL_MS")
            .unwrap_or(defaults.default_ttl.remote());

        Self {
            memory_capacity,
            memory_max_ttl,
            remote_timeout,
            default_ttl: TierTtl::new(memory_ttl, remote_ttl),
        }
    }

    /// Set the memory tier capacity.
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    /// Set the memory tier TTL ceiling.
    pub fn with_memory_max_ttl(mut self, ttl: Duration) -> Self {
        self.memory_max_ttl = ttl;
        self
    }

    /// Set the remote call timeout.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Set the default TTLs.
    pub fn with_default_ttl(mut self, ttl: TierTtl) -> Self {
        self.default_ttl = ttl;
        self
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ttl_clamps_memory() {
        let ttl = TierTtl::new(Duration::from_secs(120), Duration::from_secs(30));
        assert_eq!(ttl.memory(), Duration::from_secs(30));
        assert_eq!(ttl.remote(), Duration::from_secs(30));

        let ttl = TierTtl::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(ttl.memory(), Duration::from_millis(100));
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_memory_capacity(5000)
            .with_memory_max_ttl(Duration::from_secs(30))
            .with_remote_timeout(Duration::from_millis(20))
            .with_default_ttl(TierTtl::uniform(Duration::from_secs(5)));

        assert_eq!(config.memory_capacity, 5000);
        assert_eq!(config.memory_max_ttl, Duration::from_secs(30));
        assert_eq!(config.remote_timeout, Duration::from_millis(20));
        assert_eq!(config.default_ttl.memory(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_ttl_respects_invariant() {
        let config = CacheConfig::default();
        assert!(config.default_ttl.memory() <= config.default_ttl.remote());
    }
}
