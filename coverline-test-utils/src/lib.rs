//! Coverline Test Utilities
//!
//! Shared test infrastructure for the Coverline workspace:
//! - A fault-injecting remote cache tier
//! - Proptest generators for tiers, route classes and metrics samples
//! - Fixtures for clocks, samples and activity events
//! - Assertions for cache statistics

pub use coverline_cache::{
    CacheConfig, CacheKey, CacheStats, InMemoryRemoteTier, MultiLevelCache, RemoteEntry,
    RemoteTier, TierTtl,
};
pub use coverline_core::{
    ActivityKind, CacheError, Clock, ManualClock, PipelineStage, RequestMetricsSample,
    RouteClass, StatusCategory, Timestamp, UserActivityEvent, UserTier,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// FAULT-INJECTING REMOTE TIER
// ============================================================================

/// Remote tier that can be switched into failure or slow mode at runtime.
///
/// Wraps an [`InMemoryRemoteTier`]. While `failing` is set every call returns
/// [`CacheError::Remote`]; while a delay is set every call sleeps first, which
/// lets tests trip the cache's remote timeout.
#[derive(Debug)]
pub struct FlakyRemoteTier {
    inner: InMemoryRemoteTier,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicU64,
}

impl FlakyRemoteTier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: InMemoryRemoteTier::new(clock),
            failing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Total calls received, including failed ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Entries currently held, including expired ones.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    async fn before_call(&self) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Remote {
                tier: "flaky".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTier for FlakyRemoteTier {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<RemoteEntry>, CacheError> {
        self.before_call().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.before_call().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.before_call().await?;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.before_call().await?;
        self.inner.delete_prefix(prefix).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.before_call().await?;
        self.inner.clear().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Coverline types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_tier() -> impl Strategy<Value = UserTier> {
        prop_oneof![
            Just(UserTier::Free),
            Just(UserTier::Pro),
            Just(UserTier::Enterprise),
        ]
    }

    pub fn arb_route_class() -> impl Strategy<Value = RouteClass> {
        prop_oneof![
            Just(RouteClass::General),
            Just(RouteClass::Save),
            Just(RouteClass::Generate),
        ]
    }

    /// Status codes weighted towards success, as in real traffic.
    pub fn arb_status_code() -> impl Strategy<Value = u16> {
        prop_oneof![
            6 => prop_oneof![Just(200u16), Just(201), Just(204)],
            3 => prop_oneof![Just(400u16), Just(401), Just(403), Just(404), Just(429)],
            1 => Just(500u16),
        ]
    }

    pub fn arb_status_category() -> impl Strategy<Value = StatusCategory> {
        prop_oneof![
            Just(StatusCategory::Success),
            Just(StatusCategory::ClientError),
            Just(StatusCategory::ServerError),
        ]
    }

    /// A finalised sample started at `started_at`.
    pub fn arb_sample(started_at: Timestamp) -> impl Strategy<Value = RequestMetricsSample> {
        (
            arb_status_code(),
            0.1f64..2_000.0,
            proptest::option::of(any::<bool>()),
            proptest::option::of(0.1f64..500.0),
            prop_oneof![
                Just("/api/v1/cover-letters"),
                Just("/api/v1/cover-letters/{id}"),
                Just("/api/v1/dashboard/metrics"),
            ],
        )
            .prop_map(move |(status, duration_ms, cache_hit, db_ms, route)| {
                fixtures::sample_with(route, status, duration_ms, started_at)
                    .with_cache_hit(cache_hit)
                    .with_db_time(db_ms)
                    .build()
            })
    }

    pub fn arb_samples(
        started_at: Timestamp,
        max: usize,
    ) -> impl Strategy<Value = Vec<RequestMetricsSample>> {
        proptest::collection::vec(arb_sample(started_at), 1..=max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use chrono::Duration as ChronoDuration;

    /// Shared manual clock frozen at 2024-01-01 00:00:00 UTC.
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_epoch_2024())
    }

    /// Cache over an in-memory remote tier driven by `clock`.
    pub fn in_memory_cache(
        config: CacheConfig,
        clock: Arc<ManualClock>,
    ) -> (MultiLevelCache, Arc<InMemoryRemoteTier>) {
        let remote = Arc::new(InMemoryRemoteTier::new(clock.clone()));
        let cache = MultiLevelCache::new(config, remote.clone(), clock);
        (cache, remote)
    }

    /// Cache over a [`FlakyRemoteTier`] driven by `clock`.
    pub fn flaky_cache(
        config: CacheConfig,
        clock: Arc<ManualClock>,
    ) -> (MultiLevelCache, Arc<FlakyRemoteTier>) {
        let remote = Arc::new(FlakyRemoteTier::new(clock.clone()));
        let cache = MultiLevelCache::new(config, remote.clone(), clock);
        (cache, remote)
    }

    /// Builder for [`RequestMetricsSample`] fixtures.
    #[derive(Debug, Clone)]
    pub struct SampleBuilder {
        sample: RequestMetricsSample,
    }

    impl SampleBuilder {
        pub fn with_cache_hit(mut self, hit: Option<bool>) -> Self {
            self.sample.cache_hit = hit;
            self
        }

        pub fn with_db_time(mut self, ms: Option<f64>) -> Self {
            self.sample.db_query_time_ms = ms;
            self
        }

        pub fn rejected_at(mut self, stage: PipelineStage) -> Self {
            self.sample.rejected_at = Some(stage);
            self
        }

        pub fn tier(mut self, tier: UserTier) -> Self {
            self.sample.tier = Some(tier);
            self
        }

        pub fn method(mut self, method: &str) -> Self {
            self.sample.method = method.to_string();
            self
        }

        pub fn build(self) -> RequestMetricsSample {
            self.sample
        }
    }

    /// A sample for `route` with the given status and duration.
    pub fn sample_with(
        route: &str,
        status_code: u16,
        duration_ms: f64,
        started_at: Timestamp,
    ) -> SampleBuilder {
        SampleBuilder {
            sample: RequestMetricsSample {
                request_id: Uuid::now_v7(),
                route: route.to_string(),
                method: "GET".to_string(),
                started_at,
                duration_ms,
                status_category: StatusCategory::from_status(status_code),
                status_code,
                cache_hit: None,
                db_query_time_ms: None,
                rejected_at: None,
                tier: None,
            },
        }
    }

    /// A successful GET sample of `duration_ms`.
    pub fn ok_sample(duration_ms: f64, started_at: Timestamp) -> RequestMetricsSample {
        sample_with("/api/v1/cover-letters", 200, duration_ms, started_at).build()
    }

    /// A server-error sample.
    pub fn failed_sample(started_at: Timestamp) -> RequestMetricsSample {
        sample_with("/api/v1/cover-letters", 500, 5.0, started_at).build()
    }

    /// `count` successful samples with durations 1, 2, ..., count milliseconds,
    /// spaced one second apart ending at `end`.
    pub fn latency_ladder(count: usize, end: Timestamp) -> Vec<RequestMetricsSample> {
        (1..=count)
            .map(|i| {
                let offset = ChronoDuration::seconds((count - i) as i64);
                ok_sample(i as f64, end - offset)
            })
            .collect()
    }

    pub fn activity(user_id: Uuid, kind: ActivityKind, at: Timestamp) -> UserActivityEvent {
        UserActivityEvent::new(user_id, kind, at)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache statistics.

    use super::*;

    /// Assert the tier split of lookups.
    #[track_caller]
    pub fn assert_lookups(stats: &CacheStats, memory_hits: u64, remote_hits: u64, misses: u64) {
        assert_eq!(
            (stats.memory_hits, stats.remote_hits, stats.misses),
            (memory_hits, remote_hits, misses),
            "unexpected lookup split in {:?}",
            stats
        );
    }

    /// Assert that two floats are within `eps`.
    #[track_caller]
    pub fn assert_close(actual: f64, expected: f64, eps: f64) {
        assert!(
            (actual - expected).abs() <= eps,
            "expected {expected} ± {eps}, got {actual}"
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
