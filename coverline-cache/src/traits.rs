//! Remote tier and fetcher traits, plus cache statistics.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use coverline_core::{CacheError, CoverlineResult, Timestamp};
use serde::Serialize;

use crate::key::CacheKey;

/// A live entry read from the remote tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// JSON-serialised payload.
    pub value: Vec<u8>,
    pub created_at: Timestamp,
    /// Absolute expiry; used to size the memory backfill.
    pub expires_at: Timestamp,
}

/// Shared cache tier behind the process-local memory tier.
///
/// Implementations must never return an expired entry from `get`. Errors are
/// reported to the caller, which treats them as degradation rather than
/// failure.
#[async_trait]
pub trait RemoteTier: Send + Sync + Debug {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &CacheKey) -> Result<Option<RemoteEntry>, CacheError>;

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Returns true if an entry was removed.
    async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Remove every entry whose key starts with `prefix`. Returns the count removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

/// Source of truth consulted on a full cache miss.
///
/// This is the database seam: the cache never talks to storage directly.
#[async_trait]
pub trait ResourceFetcher<T>: Send + Sync {
    /// Identifier the fetcher understands (entity id, page tuple, ...).
    type Id: Send + Sync;

    async fn fetch(&self, id: &Self::Id) -> CoverlineResult<Option<T>>;
}

/// Cumulative counters for a [`crate::MultiLevelCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    /// Remote hits copied into the memory tier.
    pub backfills: u64,
    /// Remote failures and timeouts that were swallowed.
    pub remote_errors: u64,
    /// Memory entries dropped to make room.
    pub evictions: u64,
    pub memory_entries: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.memory_hits + self.remote_hits + self.misses
    }

    /// Calculate the hit rate across both tiers (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.lookups();
        if total == 0 {
            0.0
        } else {
            (self.memory_hits + self.remote_hits) as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            memory_hits: 60,
            remote_hits: 20,
            misses: 20,
            ..Default::default()
        };
        assert_eq!(stats.lookups(), 100);
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
