//! Shared application state for Axum routers.

use std::sync::Arc;

use axum::extract::FromRef;
use coverline_cache::{MultiLevelCache, TierTtl};
use coverline_core::Clock;

use crate::auth::{AuthConfig, Authenticator, CredentialAuthenticator};
use crate::config::{MetricsConfig, RateLimitPolicy};
use crate::error::ApiResult;
use crate::middleware::{Pipeline, RateLimiter};
use crate::routes::cover_letters::save_letter_schema;
use crate::store::CoverLetterStore;
use crate::telemetry::MetricsRecorder;
use crate::validation::RequestSchema;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    /// Multi-level cache in front of the store.
    pub cache: Arc<MultiLevelCache>,
    pub store: Arc<dyn CoverLetterStore>,
    pub clock: Arc<dyn Clock>,
    /// TTLs for cover letter reads and list pages.
    pub letter_ttl: TierTtl,
    /// Compiled body schema for `POST /api/v1/cover-letters`.
    pub save_schema: Arc<RequestSchema>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("pipeline", &self.pipeline)
            .field("cache", &self.cache)
            .field("store", &self.store)
            .field("letter_ttl", &self.letter_ttl)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the pipeline and its collaborators around one clock.
    pub fn new(
        auth: AuthConfig,
        policy: RateLimitPolicy,
        metrics: MetricsConfig,
        cache: Arc<MultiLevelCache>,
        store: Arc<dyn CoverLetterStore>,
        clock: Arc<dyn Clock>,
    ) -> ApiResult<Self> {
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(CredentialAuthenticator::new(auth.with_clock(Arc::clone(&clock))));
        Self::with_authenticator(authenticator, policy, metrics, cache, store, clock)
    }

    /// Same as [`AppState::new`] with a caller-supplied authenticator.
    pub fn with_authenticator(
        authenticator: Arc<dyn Authenticator>,
        policy: RateLimitPolicy,
        metrics: MetricsConfig,
        cache: Arc<MultiLevelCache>,
        store: Arc<dyn CoverLetterStore>,
        clock: Arc<dyn Clock>,
    ) -> ApiResult<Self> {
        let limiter = Arc::new(RateLimiter::new(policy, Arc::clone(&clock)));
        let recorder = Arc::new(MetricsRecorder::new(metrics, Arc::clone(&clock))?);
        let letter_ttl = cache.config().default_ttl;
        let save_schema = Arc::new(save_letter_schema()?);

        Ok(Self {
            pipeline: Pipeline::new(authenticator, limiter, recorder, Arc::clone(&clock)),
            cache,
            store,
            clock,
            letter_ttl,
            save_schema,
        })
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        self.pipeline.recorder()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.pipeline.limiter()
    }
}

impl FromRef<AppState> for Arc<MultiLevelCache> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.cache)
    }
}
