//! Read results that carry their provenance.

use coverline_core::Timestamp;
use serde::Serialize;

/// Where a read-through value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Memory,
    Remote,
    /// Loaded from the [`crate::ResourceFetcher`] after a miss in both tiers.
    Fetcher,
}

/// Result of [`crate::MultiLevelCache::get_or_fetch`].
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    source: CacheSource,
    read_at: Timestamp,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, source: CacheSource, read_at: Timestamp) -> Self {
        Self {
            value,
            source,
            read_at,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn source(&self) -> CacheSource {
        self.source
    }

    pub fn read_at(&self) -> Timestamp {
        self.read_at
    }

    /// True if either tier served the value.
    pub fn was_cache_hit(&self) -> bool {
        !self.was_cache_miss()
    }

    pub fn was_cache_miss(&self) -> bool {
        self.source == CacheSource::Fetcher
    }

    /// Transform the value, keeping provenance.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            source: self.source,
            read_at: self.read_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coverline_core::{Clock, ManualClock};

    #[test]
    fn test_hit_and_miss_flags() {
        let now = ManualClock::default().now();
        assert!(CacheRead::new(1, CacheSource::Memory, now).was_cache_hit());
        assert!(CacheRead::new(1, CacheSource::Remote, now).was_cache_hit());
        assert!(CacheRead::new(1, CacheSource::Fetcher, now).was_cache_miss());
    }

    #[test]
    fn test_map_keeps_source() {
        let now = ManualClock::default().now();
        let read = CacheRead::new(21, CacheSource::Remote, now).map(|v| v * 2);
        assert_eq!(read.source(), CacheSource::Remote);
        assert_eq!(read.into_value(), 42);
    }
}
