//! Non-persistent remote tier implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coverline_core::clock::deadline_after;
use coverline_core::{CacheError, Clock};
use dashmap::DashMap;

use crate::key::CacheKey;
use crate::traits::{RemoteEntry, RemoteTier};

/// Remote tier held in process memory.
///
/// Stands in for a shared cache in tests and single-node deployments. Expiry
/// follows the injected clock, so tests can age entries without sleeping.
#[derive(Debug)]
pub struct InMemoryRemoteTier {
    entries: DashMap<String, RemoteEntry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRemoteTier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, including expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RemoteTier for InMemoryRemoteTier {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<RemoteEntry>, CacheError> {
        let now = self.clock.now();
        {
            let Some(entry) = self.entries.get(key.as_str()) else {
                return Ok(None);
            };
            if entry.expires_at > now {
                return Ok(Some(entry.clone()));
            }
        }
        self.entries
            .remove_if(key.as_str(), |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            self.entries.remove(key.as_str());
            return Ok(());
        }
        let now = self.clock.now();
        self.entries.insert(
            key.as_str().to_string(),
            RemoteEntry {
                value,
                created_at: now,
                expires_at: deadline_after(now, ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key.as_str()).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut removed = 0u64;
        self.entries.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

/// Remote tier that stores nothing, for memory-only deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRemoteTier;

#[async_trait]
impl RemoteTier for NullRemoteTier {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn get(&self, _key: &CacheKey) -> Result<Option<RemoteEntry>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &CacheKey, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &CacheKey) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
        Ok(0)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coverline_core::ManualClock;

    fn key(id: &str) -> CacheKey {
        CacheKey::builder("cover_letter", "u1").segment(id).build()
    }

    #[tokio::test]
    async fn test_in_memory_tier_expiry() -> Result<(), CacheError> {
        let clock = Arc::new(ManualClock::default());
        let tier = InMemoryRemoteTier::new(clock.clone());

        tier.set(&key("a"), b"\"v\"".to_vec(), Duration::from_millis(1000))
            .await?;
        clock.advance(Duration::from_millis(999));
        let entry = tier.get(&key("a")).await?;
        assert_eq!(entry.map(|e| e.value), Some(b"\"v\"".to_vec()));

        clock.advance(Duration::from_millis(1));
        assert!(tier.get(&key("a")).await?.is_none());
        assert!(tier.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_tier_delete_prefix() -> Result<(), CacheError> {
        let clock = Arc::new(ManualClock::default());
        let tier = InMemoryRemoteTier::new(clock);
        let other = CacheKey::builder("cover_letter", "u2").segment("a").build();

        tier.set(&key("a"), vec![1], Duration::from_secs(1)).await?;
        tier.set(&key("b"), vec![2], Duration::from_secs(1)).await?;
        tier.set(&other, vec![3], Duration::from_secs(1)).await?;

        let removed = tier
            .delete_prefix(&CacheKey::prefix_for("cover_letter", "u1"))
            .await?;
        assert_eq!(removed, 2);
        assert!(tier.get(&other).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_null_tier_stores_nothing() -> Result<(), CacheError> {
        let tier = NullRemoteTier;
        tier.set(&key("a"), vec![1], Duration::from_secs(1)).await?;
        assert!(tier.get(&key("a")).await?.is_none());
        assert!(!tier.delete(&key("a")).await?);
        Ok(())
    }
}
