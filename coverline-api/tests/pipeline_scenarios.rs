//! End-to-end pipeline scenarios driven through `Pipeline::handle` with a
//! manual clock and an in-memory remote cache tier.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::to_bytes;
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use coverline_api::{
    ApiError, ApiKeyGrant, ApiResponse, ApiResult, AuthConfig, CredentialAuthenticator,
    ErrorCode, MetricsConfig, MetricsRecorder, MiddlewareContext, NoBody, Pipeline,
    PipelineRequest, RateLimitPolicy, RateLimiter, RequestSchema, RouteSpec,
};
use coverline_cache::{CacheConfig, CacheKey, TierTtl};
use coverline_core::{Clock, ManualClock, PipelineStage, RouteClass, UserTier};
use coverline_test_utils::assertions::assert_close;
use coverline_test_utils::fixtures;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const FREE_KEY: &str = "free-key";
const PRO_KEY: &str = "pro-key";

struct Harness {
    clock: Arc<ManualClock>,
    pipeline: Pipeline,
    recorder: Arc<MetricsRecorder>,
    free_user: Uuid,
}

impl Harness {
    fn new() -> ApiResult<Self> {
        let clock = fixtures::manual_clock();
        let free_user = Uuid::now_v7();
        let auth = AuthConfig::default()
            .with_clock(clock.clone())
            .with_api_key(
                FREE_KEY,
                ApiKeyGrant {
                    user_id: free_user,
                    tier: UserTier::Free,
                    roles: vec![],
                },
            )
            .with_api_key(
                PRO_KEY,
                ApiKeyGrant {
                    user_id: Uuid::now_v7(),
                    tier: UserTier::Pro,
                    roles: vec![],
                },
            );
        let recorder = Arc::new(MetricsRecorder::new(MetricsConfig::default(), clock.clone())?);
        let limiter = Arc::new(RateLimiter::new(RateLimitPolicy::default(), clock.clone()));
        let pipeline = Pipeline::new(
            Arc::new(CredentialAuthenticator::new(auth)),
            limiter,
            Arc::clone(&recorder),
            clock.clone(),
        );
        Ok(Self {
            clock,
            pipeline,
            recorder,
            free_user,
        })
    }

    fn samples(&self) -> Vec<coverline_core::RequestMetricsSample> {
        self.recorder.samples_in(Duration::from_secs(3600))
    }
}

fn request(key: &str) -> PipelineRequest {
    PipelineRequest::new(Method::POST, "/api/v1/cover-letters").header("x-api-key", key)
}

async fn exploding_handler(_ctx: MiddlewareContext, _body: NoBody) -> ApiResult<String> {
    panic!("template renderer crashed")
}

async fn body_json(response: axum::response::Response) -> Result<Value, Box<dyn std::error::Error>> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Deserialize)]
struct Draft {
    title: String,
}

#[tokio::test]
async fn handler_panic_becomes_internal_error_with_one_failed_sample(
) -> Result<(), Box<dyn std::error::Error>> {
    let h = Harness::new()?;
    let route = RouteSpec::new("/api/v1/cover-letters/generate", RouteClass::Generate);

    let response = h
        .pipeline
        .handle(&route, request(FREE_KEY), exploding_handler)
        .await;
    assert!(matches!(response, ApiResponse::InternalError(_)));

    let response = response.into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await?;
    assert_eq!(body["code"], "INTERNAL_ERROR");
    assert!(!body["message"].as_str().unwrap_or_default().contains("template"));

    let samples = h.samples();
    assert_eq!(samples.len(), 1);
    assert!(!samples[0].success());
    assert_eq!(samples[0].status_code, 500);
    assert_eq!(samples[0].rejected_at, Some(PipelineStage::Handler));
    Ok(())
}

#[tokio::test]
async fn malformed_body_never_reaches_handler() -> Result<(), Box<dyn std::error::Error>> {
    let h = Harness::new()?;
    let schema = Arc::new(RequestSchema::new(
        "draft",
        &json!({
            "type": "object",
            "required": ["title"],
            "properties": { "title": { "type": "string" } }
        }),
    )?);
    let route = RouteSpec::new("/api/v1/cover-letters", RouteClass::Save).schema(schema);
    let calls = Arc::new(AtomicUsize::new(0));

    for body in [&b"{not json"[..], &br#"{"title": 5}"#[..], &b""[..]] {
        let spy = Arc::clone(&calls);
        let response = h
            .pipeline
            .handle(&route, request(FREE_KEY).body(body.to_vec()), |_ctx, draft: Draft| async move {
                spy.fetch_add(1, Ordering::SeqCst);
                Ok(draft.title)
            })
            .await;
        assert_eq!(response.error().map(|e| e.code), Some(ErrorCode::ValidationError));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let samples = h.samples();
    assert_eq!(samples.len(), 3);
    assert!(samples
        .iter()
        .all(|s| s.rejected_at == Some(PipelineStage::Validation) && s.status_code == 400));
    Ok(())
}

#[tokio::test]
async fn free_tier_save_quota_is_three_per_window() -> Result<(), Box<dyn std::error::Error>> {
    let h = Harness::new()?;
    let route = RouteSpec::new("/api/v1/cover-letters", RouteClass::Save);
    let save = |_ctx: MiddlewareContext, _: NoBody| async { Ok::<_, ApiError>("saved") };

    for _ in 0..3 {
        let response = h.pipeline.handle(&route, request(FREE_KEY), save).await;
        assert!(response.is_success());
    }

    let limited = h.pipeline.handle(&route, request(FREE_KEY), save).await;
    let ApiResponse::RateLimited {
        retry_after_secs,
        decision: Some(decision),
        ..
    } = limited
    else {
        panic!("expected RATE_LIMITED, got {limited:?}");
    };
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert!(decision.reset_at > h.clock.now());
    assert_eq!(retry_after_secs, 60);

    let response = ApiResponse::<()>::RateLimited {
        error: ApiError::rate_limited(retry_after_secs),
        retry_after_secs,
        decision: Some(decision),
    }
    .into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
        Some("60")
    );

    // A different route class has its own window.
    let general = RouteSpec::new("/api/v1/cover-letters", RouteClass::General);
    assert!(h.pipeline.handle(&general, request(FREE_KEY), save).await.is_success());

    h.clock.advance(Duration::from_secs(60));
    let after_reset = h.pipeline.handle(&route, request(FREE_KEY), save).await;
    assert!(after_reset.is_success());

    let rejected: Vec<_> = h
        .samples()
        .into_iter()
        .filter(|s| s.rejected_at == Some(PipelineStage::RateLimit))
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].status_code, 429);
    assert_eq!(rejected[0].tier, Some(UserTier::Free));
    Ok(())
}

#[tokio::test]
async fn protected_route_without_credentials_is_unauthorized() -> ApiResult<()> {
    let h = Harness::new()?;
    let route = RouteSpec::new("/api/v1/cover-letters", RouteClass::General);
    let calls = Arc::new(AtomicUsize::new(0));

    let anonymous = PipelineRequest::new(Method::GET, "/api/v1/cover-letters");
    let bad_key = PipelineRequest::new(Method::GET, "/api/v1/cover-letters")
        .header("x-api-key", "nope");
    let bad_token = PipelineRequest::new(Method::GET, "/api/v1/cover-letters")
        .header("authorization", "Bearer not-a-jwt");

    for req in [anonymous, bad_key, bad_token] {
        let spy = Arc::clone(&calls);
        let response = h
            .pipeline
            .handle(&route, req, |_ctx, _: NoBody| async move {
                spy.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(response, ApiResponse::Unauthorized(_)));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let samples = h.samples();
    assert_eq!(samples.len(), 3);
    assert!(samples
        .iter()
        .all(|s| s.rejected_at == Some(PipelineStage::Authentication) && s.status_code == 401));
    Ok(())
}

#[tokio::test]
async fn tier_gated_route_forbids_lower_tiers() -> ApiResult<()> {
    let h = Harness::new()?;
    let route =
        RouteSpec::new("/api/v1/dashboard/metrics", RouteClass::General).min_tier(UserTier::Pro);
    let handler = |_ctx: MiddlewareContext, _: NoBody| async { Ok::<_, ApiError>("dashboard") };

    let free = h.pipeline.handle(&route, request(FREE_KEY), handler).await;
    assert_eq!(free.error().map(|e| e.code), Some(ErrorCode::Forbidden));

    let pro = h.pipeline.handle(&route, request(PRO_KEY), handler).await;
    assert_eq!(pro.into_result()?, "dashboard");

    let samples = h.samples();
    assert_eq!(samples[0].rejected_at, Some(PipelineStage::Authorization));
    assert_eq!(samples[0].status_code, 403);
    assert!(samples[1].success());
    Ok(())
}

#[tokio::test]
async fn anonymous_callers_are_limited_by_client_ip() -> ApiResult<()> {
    let h = Harness::new()?;
    let route = RouteSpec::new("/api/v1/cover-letters/generate", RouteClass::Generate).public();
    let handler = |ctx: MiddlewareContext, _: NoBody| async move {
        Ok::<_, ApiError>(ctx.user().is_none())
    };
    let from = |ip: [u8; 4]| {
        PipelineRequest::new(Method::POST, "/api/v1/cover-letters/generate").client_ip(ip.into())
    };

    // Anonymous callers get the free tier's generate quota.
    let quota = RateLimitPolicy::default()
        .quota(UserTier::Free, RouteClass::Generate)
        .limit();
    for _ in 0..quota {
        let response = h.pipeline.handle(&route, from([198, 51, 100, 1]), handler).await;
        assert!(response.into_result()?);
    }
    let limited = h.pipeline.handle(&route, from([198, 51, 100, 1]), handler).await;
    assert_eq!(limited.error().map(|e| e.code), Some(ErrorCode::RateLimited));

    let other = h.pipeline.handle(&route, from([198, 51, 100, 2]), handler).await;
    assert!(other.is_success());
    Ok(())
}

#[tokio::test]
async fn handler_cache_reads_and_db_time_land_in_the_sample() -> Result<(), Box<dyn std::error::Error>>
{
    let h = Harness::new()?;
    let (cache, _remote) = fixtures::in_memory_cache(CacheConfig::default(), h.clock.clone());
    let cache = Arc::new(cache);
    let key = CacheKey::builder("cover_letter", h.free_user).segment("draft").build();
    let ttl = TierTtl::new(Duration::from_millis(100), Duration::from_millis(1000));
    cache.set(&key, "v", ttl).await?;

    // Memory copy expires; the remote copy still serves and backfills memory.
    h.clock.advance(Duration::from_millis(150));

    let route = RouteSpec::new("/api/v1/cover-letters/{id}", RouteClass::General);
    let response = h
        .pipeline
        .handle(&route, request(FREE_KEY), |ctx, _: NoBody| {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            async move {
                let value: Option<String> = cache.get(&key).await;
                ctx.metrics().record_cache_hit(value.is_some());
                ctx.time_db(tokio::time::sleep(Duration::from_millis(2))).await;
                value.ok_or_else(|| ApiError::not_found("draft"))
            }
        })
        .await;
    assert_eq!(response.into_result()?, "v");

    let stats = cache.stats();
    assert_eq!((stats.remote_hits, stats.backfills), (1, 1));
    let again: Option<String> = cache.get(&key).await;
    assert_eq!(again.as_deref(), Some("v"));
    assert_eq!(cache.stats().memory_hits, 1);

    let samples = h.samples();
    assert_eq!(samples[0].cache_hit, Some(true));
    assert!(samples[0].db_query_time_ms.unwrap_or_default() >= 1.0);
    Ok(())
}

#[tokio::test]
async fn dashboard_error_rate_matches_recorded_outcomes() -> ApiResult<()> {
    let h = Harness::new()?;
    let route = RouteSpec::new("/api/v1/cover-letters", RouteClass::General);
    let outcomes = [true, true, false, true, false, true, true, true];

    for ok in outcomes {
        let _ = h
            .pipeline
            .handle(&route, request(PRO_KEY), move |_ctx, _: NoBody| async move {
                if ok {
                    Ok(())
                } else {
                    Err(ApiError::internal_error("store unavailable"))
                }
            })
            .await;
    }

    let dashboard = h.recorder.dashboard(Duration::from_secs(60));
    assert_eq!(dashboard.total_requests, outcomes.len() as u64);
    assert_close(dashboard.error_rate, 2.0 / 8.0, 1e-9);
    assert_eq!(dashboard.server_errors, 2);
    assert_eq!(dashboard.rejections.get("handler"), Some(&2));
    assert_eq!(dashboard.rejections.get("rate_limit"), Some(&0));
    Ok(())
}

#[test]
fn dashboard_percentiles_and_throughput_over_latency_ladder() -> ApiResult<()> {
    let clock: Arc<ManualClock> = fixtures::manual_clock();
    let recorder = MetricsRecorder::new(MetricsConfig::default(), clock.clone())?;
    for sample in fixtures::latency_ladder(100, clock.now()) {
        recorder.record(sample);
    }

    let dashboard = recorder.dashboard(Duration::from_secs(100));
    assert_eq!(dashboard.total_requests, 100);
    assert_close(dashboard.latency.p50_ms, 50.0, 1e-9);
    assert_close(dashboard.latency.p95_ms, 95.0, 1e-9);
    assert_close(dashboard.latency.p99_ms, 99.0, 1e-9);
    assert_close(dashboard.latency.avg_ms, 50.5, 1e-9);
    assert_close(dashboard.throughput_rps, 1.0, 1e-9);
    assert_eq!(dashboard.error_rate, 0.0);

    // Only the ten most recent samples fall inside a 10s window.
    let narrow = recorder.dashboard(Duration::from_secs(9));
    assert_eq!(narrow.total_requests, 10);
    assert_close(narrow.latency.p50_ms, 95.0, 1e-9);
    Ok(())
}
