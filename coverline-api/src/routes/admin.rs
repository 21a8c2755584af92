//! Administrative cache routes. Require the `admin` role.

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use coverline_cache::CacheStats;
use coverline_core::RouteClass;
use serde::Serialize;

use crate::error::ApiResult;
use crate::middleware::{ApiResponse, MiddlewareContext, NoBody, PipelineRequest, RouteSpec};
use crate::state::AppState;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub hit_rate: f64,
    pub remote: &'static str,
    pub rate_limit_windows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheClearResponse {
    pub cleared: bool,
    /// Counters as they were just before the flush.
    pub previous: CacheStats,
}

async fn stats(state: &AppState, _ctx: MiddlewareContext) -> ApiResult<CacheStatsResponse> {
    let stats = state.cache.stats();
    Ok(CacheStatsResponse {
        hit_rate: stats.hit_rate(),
        stats,
        remote: state.cache.remote_name(),
        rate_limit_windows: state.limiter().len(),
    })
}

async fn clear(state: &AppState, ctx: MiddlewareContext) -> ApiResult<CacheClearResponse> {
    let previous = state.cache.stats();
    state.cache.clear().await;
    state.cache.reset_stats();
    tracing::warn!(
        request_id = %ctx.request_id(),
        user_id = ?ctx.user().map(|u| u.user_id),
        "Cache cleared by administrator"
    );
    Ok(CacheClearResponse {
        cleared: true,
        previous,
    })
}

/// GET /api/v1/admin/cache/stats
pub async fn cache_stats(
    State(state): State<AppState>,
    request: PipelineRequest,
) -> ApiResponse<CacheStatsResponse> {
    let route = RouteSpec::new("/api/v1/admin/cache/stats", RouteClass::General).role(ADMIN_ROLE);
    state
        .pipeline
        .handle(&route, request, |ctx, _: NoBody| stats(&state, ctx))
        .await
}

/// POST /api/v1/admin/cache/clear
pub async fn cache_clear(
    State(state): State<AppState>,
    request: PipelineRequest,
) -> ApiResponse<CacheClearResponse> {
    let route = RouteSpec::new("/api/v1/admin/cache/clear", RouteClass::Save).role(ADMIN_ROLE);
    state
        .pipeline
        .handle(&route, request, |ctx, _: NoBody| clear(&state, ctx))
        .await
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(cache_clear))
}
