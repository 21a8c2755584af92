//! Per-request context handed to route handlers.

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ApiResult};
use crate::middleware::rate_limit::RateLimitDecision;
use coverline_cache::CacheRead;
use coverline_core::{RequestId, Timestamp};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CACHE_UNSET: u8 = 0;
const CACHE_HIT: u8 = 1;
const CACHE_MISS: u8 = 2;

/// Handler-side metrics for one request.
///
/// Cloned into the handler and read back by the pipeline when the sample is
/// finalised. A request counts as a cache hit only if every cache read it
/// made was a hit.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    cache: AtomicU8,
    db_micros: AtomicU64,
    db_used: AtomicBool,
}

impl RequestMetrics {
    pub fn record_cache_hit(&self, hit: bool) {
        if hit {
            let _ = self.cache.compare_exchange(
                CACHE_UNSET,
                CACHE_HIT,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        } else {
            self.cache.store(CACHE_MISS, Ordering::Release);
        }
    }

    pub fn add_db_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.db_micros.fetch_add(micros, Ordering::AcqRel);
        self.db_used.store(true, Ordering::Release);
    }

    pub fn cache_hit(&self) -> Option<bool> {
        match self.cache.load(Ordering::Acquire) {
            CACHE_HIT => Some(true),
            CACHE_MISS => Some(false),
            _ => None,
        }
    }

    pub fn db_query_time_ms(&self) -> Option<f64> {
        self.db_used
            .load(Ordering::Acquire)
            .then(|| self.db_micros.load(Ordering::Acquire) as f64 / 1000.0)
    }
}

/// Request-scoped bag built fresh by the pipeline for every request.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    request_id: RequestId,
    user: Option<AuthenticatedUser>,
    started_at: Timestamp,
    rate_limit: Option<RateLimitDecision>,
    metrics: Arc<RequestMetrics>,
}

impl MiddlewareContext {
    pub fn new(
        request_id: RequestId,
        user: Option<AuthenticatedUser>,
        started_at: Timestamp,
        rate_limit: Option<RateLimitDecision>,
    ) -> Self {
        Self {
            request_id,
            user,
            started_at,
            rate_limit,
            metrics: Arc::new(RequestMetrics::default()),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        self.user.as_ref()
    }

    /// The authenticated user, or `UNAUTHORIZED` for anonymous requests.
    pub fn require_user(&self) -> ApiResult<&AuthenticatedUser> {
        self.user
            .as_ref()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn rate_limit(&self) -> Option<&RateLimitDecision> {
        self.rate_limit.as_ref()
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    /// Flag the request's cache outcome from a read-through result.
    pub fn observe_cache_read<T>(&self, read: &CacheRead<T>) {
        self.metrics.record_cache_hit(read.was_cache_hit());
    }

    /// Await a store call and add its wall time to the request's db time.
    pub async fn time_db<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let out = fut.await;
        self.metrics.add_db_time(started.elapsed());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_flag_any_miss_wins() {
        let metrics = RequestMetrics::default();
        assert_eq!(metrics.cache_hit(), None);
        metrics.record_cache_hit(true);
        assert_eq!(metrics.cache_hit(), Some(true));
        metrics.record_cache_hit(false);
        metrics.record_cache_hit(true);
        assert_eq!(metrics.cache_hit(), Some(false));
    }

    #[test]
    fn test_db_time_accumulates() {
        let metrics = RequestMetrics::default();
        assert_eq!(metrics.db_query_time_ms(), None);
        metrics.add_db_time(Duration::from_micros(1500));
        metrics.add_db_time(Duration::from_micros(500));
        assert_eq!(metrics.db_query_time_ms(), Some(2.0));
    }

    #[tokio::test]
    async fn test_time_db_records() {
        let ctx = MiddlewareContext::new(uuid::Uuid::now_v7(), None, chrono::Utc::now(), None);
        let value = ctx.time_db(async { 7 }).await;
        assert_eq!(value, 7);
        assert!(ctx.metrics().db_query_time_ms().is_some());
        assert!(ctx.require_user().is_err());
    }
}
