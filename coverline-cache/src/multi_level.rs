//! Two-tier cache: memory in front of a remote tier.
//!
//! Reads try memory, then remote, and backfill memory on a remote hit. Writes
//! go through to both tiers. The remote tier can only degrade the cache, never
//! fail it: each remote call is bounded by [`CacheConfig::remote_timeout`] and
//! any error is logged and counted.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use coverline_core::clock::remaining_until;
use coverline_core::{CacheError, Clock, CoverlineResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{CacheConfig, TierTtl};
use crate::key::CacheKey;
use crate::memory::MemoryTier;
use crate::read::{CacheRead, CacheSource};
use crate::remote::NullRemoteTier;
use crate::traits::{CacheStats, RemoteEntry, RemoteTier, ResourceFetcher};

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    backfills: AtomicU64,
    remote_errors: AtomicU64,
}

/// Multi-level cache shared by all request handlers.
#[derive(Debug)]
pub struct MultiLevelCache {
    memory: MemoryTier,
    remote: Arc<dyn RemoteTier>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl MultiLevelCache {
    pub fn new(config: CacheConfig, remote: Arc<dyn RemoteTier>, clock: Arc<dyn Clock>) -> Self {
        let memory = MemoryTier::new(
            config.memory_capacity,
            config.memory_max_ttl,
            Arc::clone(&clock),
        );
        tracing::debug!(
            remote = remote.name(),
            memory_capacity = config.memory_capacity,
            "multi-level cache initialised"
        );
        Self {
            memory,
            remote,
            config,
            clock,
            counters: Counters::default(),
        }
    }

    /// Cache with no remote tier.
    pub fn memory_only(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config, Arc::new(NullRemoteTier), clock)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The process-local tier, for inspection.
    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn remote_name(&self) -> &'static str {
        self.remote.name()
    }

    /// Look up `key`, memory first, then remote.
    ///
    /// Every call counts exactly one memory hit, remote hit or miss. A value
    /// that fails to deserialise is dropped and counted as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.lookup(key).await.map(|(value, _)| value)
    }

    /// Write `value` to both tiers with independent expiry.
    ///
    /// Only serialisation can fail; remote failures are logged and swallowed
    /// after the memory write has happened.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: TierTtl,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        self.memory
            .insert(key.as_str(), Arc::from(bytes.as_slice()), ttl.memory());

        self.remote_call("set", key, self.remote.set(key, bytes, ttl.remote()))
            .await;
        Ok(())
    }

    /// Remove `key` from memory, and from remote on a best-effort basis.
    pub async fn delete(&self, key: &CacheKey) {
        self.memory.remove(key.as_str());
        self.remote_call("delete", key, self.remote.delete(key)).await;
    }

    /// Remove every key starting with `prefix` from both tiers.
    ///
    /// Returns the number of entries removed from the memory tier.
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        let removed = self.memory.remove_prefix(prefix);
        let remote_removed = self
            .remote_call("delete_prefix", prefix, self.remote.delete_prefix(prefix))
            .await;
        tracing::debug!(
            prefix,
            memory_removed = removed,
            remote_removed = remote_removed.unwrap_or(0),
            "cache prefix invalidated"
        );
        removed
    }

    /// Flush both tiers.
    pub async fn clear(&self) {
        self.memory.clear();
        self.remote_call("clear", "*", self.remote.clear()).await;
        tracing::info!(remote = self.remote.name(), "cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            backfills: self.counters.backfills.load(Ordering::Relaxed),
            remote_errors: self.counters.remote_errors.load(Ordering::Relaxed),
            evictions: self.memory.evictions(),
            memory_entries: self.memory.len() as u64,
        }
    }

    pub fn reset_stats(&self) {
        self.counters.memory_hits.store(0, Ordering::Relaxed);
        self.counters.remote_hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.backfills.store(0, Ordering::Relaxed);
        self.counters.remote_errors.store(0, Ordering::Relaxed);
        self.memory.reset_evictions();
    }

    /// Read-through: serve from either tier, else load from `fetcher` and
    /// populate both tiers.
    ///
    /// Returns `Ok(None)` if the fetcher has no such resource; absence is not
    /// cached.
    pub async fn get_or_fetch<T, F>(
        &self,
        key: &CacheKey,
        ttl: TierTtl,
        fetcher: &F,
        id: &F::Id,
    ) -> CoverlineResult<Option<CacheRead<T>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: ResourceFetcher<T> + ?Sized,
    {
        if let Some((value, source)) = self.lookup(key).await {
            return Ok(Some(CacheRead::new(value, source, self.clock.now())));
        }

        let Some(value) = fetcher.fetch(id).await? else {
            return Ok(None);
        };
        self.set(key, &value, ttl).await?;
        Ok(Some(CacheRead::new(
            value,
            CacheSource::Fetcher,
            self.clock.now(),
        )))
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<(T, CacheSource)> {
        if let Some(bytes) = self.memory.get(key.as_str()) {
            match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                    return Some((value, CacheSource::Memory));
                }
                Err(e) => {
                    tracing::warn!(%key, error = %e, "dropping undecodable memory cache entry");
                    self.memory.remove(key.as_str());
                }
            }
        }

        let entry = self
            .remote_call("get", key, self.remote.get(key))
            .await
            .flatten();

        let Some(entry) = entry else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match serde_json::from_slice::<T>(&entry.value) {
            Ok(value) => {
                self.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
                self.backfill(key, entry);
                Some((value, CacheSource::Remote))
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "ignoring undecodable remote cache entry");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Copy a remote hit into memory for the remote entry's remaining lifetime.
    fn backfill(&self, key: &CacheKey, entry: RemoteEntry) {
        let remaining = remaining_until(self.clock.now(), entry.expires_at);
        let ttl = remaining.min(self.config.memory_max_ttl);
        if ttl.is_zero() {
            return;
        }
        self.memory
            .insert(key.as_str(), Arc::from(entry.value), ttl);
        self.counters.backfills.fetch_add(1, Ordering::Relaxed);
    }

    /// Run a remote call under the configured timeout.
    ///
    /// Returns `None` when the call failed or timed out; the failure has been
    /// logged and counted.
    async fn remote_call<R, Fut>(
        &self,
        op: &'static str,
        key: impl std::fmt::Display,
        call: Fut,
    ) -> Option<R>
    where
        Fut: Future<Output = Result<R, CacheError>>,
    {
        let outcome = match tokio::time::timeout(self.config.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                tier: self.remote.name().to_string(),
                timeout: self.config.remote_timeout,
            }),
        };

        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.remote_errors.fetch_add(1, Ordering::Relaxed);
                let degraded = CacheError::Degraded {
                    reason: e.to_string(),
                };
                tracing::warn!(
                    tier = self.remote.name(),
                    op,
                    %key,
                    error = %degraded,
                    "remote cache tier unavailable, serving from memory"
                );
                None
            }
        }
    }
}
