//! Dashboard and activity routes.
//!
//! The metrics dashboard is a paid feature and needs the Pro tier. The
//! activity feed only shows the caller's own events.

use axum::{
    extract::{Query, State},
    http::Uri,
    routing::get,
    Router,
};
use coverline_cache::CacheStats;
use coverline_core::{RouteClass, UserActivityEvent, UserTier};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{ApiResponse, MiddlewareContext, NoBody, PipelineRequest, RouteSpec};
use crate::state::AppState;
use crate::telemetry::{ActivitySummary, DashboardMetrics};

const DEFAULT_ACTIVITY_LIMIT: usize = 20;
const MAX_ACTIVITY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DashboardParams {
    pub range_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ActivityParams {
    pub limit: Option<usize>,
}

/// Body of `GET /api/v1/dashboard/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    pub requests: DashboardMetrics,
    pub activity: ActivitySummary,
    pub cache: CacheStats,
    pub cache_hit_rate: f64,
}

fn query<T: serde::de::DeserializeOwned>(uri: &Uri) -> ApiResult<T> {
    Query::<T>::try_from_uri(uri)
        .map(|Query(params)| params)
        .map_err(|e| ApiError::validation_error(e.body_text()))
}

async fn dashboard(
    state: &AppState,
    _ctx: MiddlewareContext,
    params: ApiResult<DashboardParams>,
) -> ApiResult<DashboardResponse> {
    let params = params?;
    let recorder = state.recorder();
    let range = recorder.clamp_range(params.range_secs.map(Duration::from_secs));
    let cache = state.cache.stats();

    Ok(DashboardResponse {
        requests: recorder.dashboard(range),
        activity: recorder.activity_summary(range),
        cache_hit_rate: cache.hit_rate(),
        cache,
    })
}

async fn activity(
    state: &AppState,
    ctx: MiddlewareContext,
    params: ApiResult<ActivityParams>,
) -> ApiResult<Vec<UserActivityEvent>> {
    let params = params?;
    let user = ctx.require_user()?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);
    Ok(state.recorder().recent_activity(user.user_id, limit))
}

/// GET /api/v1/dashboard/metrics - Request, activity and cache rollups
pub async fn dashboard_metrics(
    State(state): State<AppState>,
    uri: Uri,
    request: PipelineRequest,
) -> ApiResponse<DashboardResponse> {
    let route =
        RouteSpec::new("/api/v1/dashboard/metrics", RouteClass::General).min_tier(UserTier::Pro);
    let params = query(&uri);
    state
        .pipeline
        .handle(&route, request, |ctx, _: NoBody| dashboard(&state, ctx, params))
        .await
}

/// GET /api/v1/activity - The caller's most recent activity, newest first
pub async fn recent_activity(
    State(state): State<AppState>,
    uri: Uri,
    request: PipelineRequest,
) -> ApiResponse<Vec<UserActivityEvent>> {
    let route = RouteSpec::new("/api/v1/activity", RouteClass::General);
    let params = query(&uri);
    state
        .pipeline
        .handle(&route, request, |ctx, _: NoBody| activity(&state, ctx, params))
        .await
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/dashboard/metrics", get(dashboard_metrics))
        .route("/activity", get(recent_activity))
}
