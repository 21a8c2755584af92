//! Process-local memory tier.
//!
//! A bounded sharded map with per-entry expiry. Expiry is checked lazily on
//! read; nothing runs in the background. Lookups and writes lock a single
//! `DashMap` shard and never suspend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coverline_core::clock::deadline_after;
use coverline_core::{Clock, Timestamp};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Arc<[u8]>,
    expires_at: Timestamp,
}

/// Bounded in-process cache tier.
#[derive(Debug)]
pub struct MemoryTier {
    entries: DashMap<String, MemoryEntry>,
    capacity: usize,
    max_ttl: Duration,
    clock: Arc<dyn Clock>,
    evictions: AtomicU64,
}

impl MemoryTier {
    pub fn new(capacity: usize, max_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            max_ttl,
            clock,
            evictions: AtomicU64::new(0),
        }
    }

    /// Live value for `key`. An expired entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(key)?;
            if entry.expires_at > now {
                return Some(Arc::clone(&entry.value));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Expiry of the live entry for `key`.
    pub fn expires_at(&self, key: &str) -> Option<Timestamp> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|entry| entry.expires_at)
            .filter(|expires_at| *expires_at > now)
    }

    /// Insert with `ttl` capped at the tier's max TTL. A zero TTL removes the key.
    pub fn insert(&self, key: &str, value: Arc<[u8]>, ttl: Duration) {
        let ttl = ttl.min(self.max_ttl);
        if ttl.is_zero() {
            self.entries.remove(key);
            return;
        }

        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.make_room();
        }

        let expires_at = deadline_after(self.clock.now(), ttl);
        self.entries
            .insert(key.to_string(), MemoryEntry { value, expires_at });
    }

    /// Returns true if the key was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key starting with `prefix`. Returns the count removed.
    pub fn remove_prefix(&self, prefix: &str) -> u64 {
        let mut removed = 0u64;
        self.entries.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn reset_evictions(&self) {
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Drop every expired entry. Returns the count removed.
    pub fn sweep_expired(&self) -> u64 {
        let now = self.clock.now();
        let mut removed = 0u64;
        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Free one slot: expired entries go first, then the entry closest to expiry.
    ///
    /// Capacity is a soft bound under concurrent inserts of distinct keys.
    fn make_room(&self) {
        self.sweep_expired();
        if self.entries.len() < self.capacity {
            return;
        }

        // Refs must be dropped before removing to avoid a shard deadlock.
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(victim) = victim {
            if self.entries.remove(&victim).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %victim, "memory cache tier evicted entry");
            }
        }
    }
}
