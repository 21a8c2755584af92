//! Request middleware pipeline.
//!
//! Fixed stage order: validate the body, authenticate, authorize, rate limit,
//! then run the handler inside a fresh [`MiddlewareContext`]. Any stage may
//! short-circuit. Exactly one metrics sample is recorded per request, tagged
//! with the stage that rejected it, including when the request future is
//! dropped mid-flight.

use crate::auth::{AuthenticatedUser, Authenticator};
use crate::error::{ApiError, ApiResult};
use crate::middleware::context::{MiddlewareContext, RequestMetrics};
use crate::middleware::rate_limit::RateLimiter;
use crate::middleware::request::PipelineRequest;
use crate::middleware::response::ApiResponse;
use crate::telemetry::MetricsRecorder;
use crate::validation::{validate_body, RequestSchema};
use axum::http::StatusCode;
use coverline_core::clock::remaining_until;
use coverline_core::{
    new_request_id, Clock, PipelineStage, RequestId, RequestMetricsSample, RouteClass,
    StatusCategory, Timestamp, UserTier,
};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Body type for routes that take no request body.
pub type NoBody = serde::de::IgnoredAny;

/// Status recorded for requests dropped before a response was produced.
const CLIENT_CLOSED_REQUEST: u16 = 499;

// ============================================================================
// ROUTE SPEC
// ============================================================================

/// Who may call a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRule {
    Public,
    Authenticated,
    MinTier(UserTier),
    Role(&'static str),
}

impl AccessRule {
    pub fn requires_user(&self) -> bool {
        !matches!(self, AccessRule::Public)
    }

    /// Authorization check for an already-authenticated (or public) request.
    pub fn authorize(&self, user: Option<&AuthenticatedUser>) -> ApiResult<()> {
        match (self, user) {
            (AccessRule::Public, _) | (AccessRule::Authenticated, Some(_)) => Ok(()),
            (AccessRule::MinTier(min), Some(user)) if user.tier >= *min => Ok(()),
            (AccessRule::MinTier(min), Some(_)) => Err(ApiError::forbidden(format!(
                "This route requires the {} tier or higher",
                min
            ))),
            (AccessRule::Role(role), Some(user)) if user.has_role(role) => Ok(()),
            (AccessRule::Role(role), Some(_)) => Err(ApiError::forbidden(format!(
                "This route requires the '{}' role",
                role
            ))),
            (_, None) => Err(ApiError::unauthorized("Authentication required")),
        }
    }
}

/// Static description of one route as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    /// Route template, used as the metrics label.
    pub name: &'static str,
    pub class: RouteClass,
    pub access: AccessRule,
    pub schema: Option<Arc<RequestSchema>>,
    pub success_status: StatusCode,
}

impl RouteSpec {
    /// Authenticated route answering `200 OK`.
    pub fn new(name: &'static str, class: RouteClass) -> Self {
        Self {
            name,
            class,
            access: AccessRule::Authenticated,
            schema: None,
            success_status: StatusCode::OK,
        }
    }

    pub fn public(mut self) -> Self {
        self.access = AccessRule::Public;
        self
    }

    pub fn min_tier(mut self, tier: UserTier) -> Self {
        self.access = AccessRule::MinTier(tier);
        self
    }

    pub fn role(mut self, role: &'static str) -> Self {
        self.access = AccessRule::Role(role);
        self
    }

    pub fn schema(mut self, schema: Arc<RequestSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.success_status = status;
        self
    }
}

// ============================================================================
// SAMPLE GUARD
// ============================================================================

/// Owns the in-progress sample and records it exactly once.
struct SampleGuard {
    recorder: Arc<MetricsRecorder>,
    sample: Option<RequestMetricsSample>,
    clock: Arc<dyn Clock>,
    stage: PipelineStage,
    metrics: Option<Arc<RequestMetrics>>,
}

impl SampleGuard {
    fn new(
        recorder: Arc<MetricsRecorder>,
        clock: Arc<dyn Clock>,
        request_id: RequestId,
        route: &str,
        method: &str,
        started_at: Timestamp,
    ) -> Self {
        Self {
            recorder,
            sample: Some(RequestMetricsSample {
                request_id,
                route: route.to_string(),
                method: method.to_string(),
                started_at,
                duration_ms: 0.0,
                status_category: StatusCategory::Success,
                status_code: 0,
                cache_hit: None,
                db_query_time_ms: None,
                rejected_at: None,
                tier: None,
            }),
            clock,
            stage: PipelineStage::Validation,
            metrics: None,
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage;
    }

    fn set_tier(&mut self, tier: UserTier) {
        if let Some(sample) = self.sample.as_mut() {
            sample.tier = Some(tier);
        }
    }

    fn attach(&mut self, metrics: Arc<RequestMetrics>) {
        self.metrics = Some(metrics);
    }

    fn finish(mut self, status: StatusCode, rejected_at: Option<PipelineStage>) {
        self.emit(status.as_u16(), rejected_at);
    }

    fn emit(&mut self, status_code: u16, rejected_at: Option<PipelineStage>) {
        let Some(mut sample) = self.sample.take() else {
            return;
        };
        sample.duration_ms =
            remaining_until(sample.started_at, self.clock.now()).as_secs_f64() * 1000.0;
        sample.status_code = status_code;
        sample.status_category = StatusCategory::from_status(status_code);
        sample.rejected_at = rejected_at;
        if let Some(metrics) = &self.metrics {
            sample.cache_hit = metrics.cache_hit();
            sample.db_query_time_ms = metrics.db_query_time_ms();
        }
        self.recorder.record(sample);
    }
}

impl Drop for SampleGuard {
    fn drop(&mut self) {
        if self.sample.is_some() {
            tracing::warn!(stage = self.stage.as_str(), "Request dropped before completion");
            self.emit(CLIENT_CLOSED_REQUEST, Some(self.stage));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// The single entry point route handlers go through.
#[derive(Clone)]
pub struct Pipeline {
    authenticator: Arc<dyn Authenticator>,
    limiter: Arc<RateLimiter>,
    recorder: Arc<MetricsRecorder>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("limiter", &self.limiter)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        limiter: Arc<RateLimiter>,
        recorder: Arc<MetricsRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            authenticator,
            limiter,
            recorder,
            clock,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }

    fn reject<T>(
        &self,
        guard: SampleGuard,
        stage: PipelineStage,
        response: ApiResponse<T>,
    ) -> ApiResponse<T> {
        if let Some(error) = response.error() {
            tracing::info!(stage = stage.as_str(), code = %error.code, message = %error.message, "Request rejected");
        }
        guard.finish(response.status(), Some(stage));
        response
    }

    /// Run `handler` for `request` through every pipeline stage.
    ///
    /// The handler is only invoked when all earlier stages pass. Its panics
    /// become `INTERNAL_ERROR`; its errors are routed by code.
    pub async fn handle<B, T, F, Fut>(
        &self,
        route: &RouteSpec,
        request: PipelineRequest,
        handler: F,
    ) -> ApiResponse<T>
    where
        B: DeserializeOwned,
        F: FnOnce(MiddlewareContext, B) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let request_id = new_request_id();
        let span = tracing::info_span!(
            "pipeline",
            %request_id,
            route = route.name,
            method = %request.method,
        );
        self.run(request_id, route, request, handler)
            .instrument(span)
            .await
    }

    async fn run<B, T, F, Fut>(
        &self,
        request_id: RequestId,
        route: &RouteSpec,
        request: PipelineRequest,
        handler: F,
    ) -> ApiResponse<T>
    where
        B: DeserializeOwned,
        F: FnOnce(MiddlewareContext, B) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let started_at = self.clock.now();
        let mut guard = SampleGuard::new(
            Arc::clone(&self.recorder),
            Arc::clone(&self.clock),
            request_id,
            route.name,
            request.method.as_str(),
            started_at,
        );

        // Validation
        guard.enter(PipelineStage::Validation);
        if let Some(reason) = &request.body_error {
            let error = ApiError::validation_error(format!("Failed to read request body: {}", reason));
            return self.reject(guard, PipelineStage::Validation, ApiResponse::ValidationError(error));
        }
        let body: B = match validate_body(&request.body, route.schema.as_deref()) {
            Ok(body) => body,
            Err(error) => {
                return self.reject(guard, PipelineStage::Validation, ApiResponse::from_error(error))
            }
        };

        // Authentication
        guard.enter(PipelineStage::Authentication);
        let user = match self.authenticator.resolve_identity(&request.headers).await {
            Ok(user) => user,
            Err(error) => {
                return self.reject(guard, PipelineStage::Authentication, ApiResponse::from_error(error))
            }
        };
        if user.is_none() && route.access.requires_user() {
            let error = ApiError::unauthorized("Authentication required");
            return self.reject(guard, PipelineStage::Authentication, ApiResponse::Unauthorized(error));
        }
        if let Some(user) = &user {
            guard.set_tier(user.tier);
        }

        // Authorization
        guard.enter(PipelineStage::Authorization);
        if let Err(error) = route.access.authorize(user.as_ref()) {
            return self.reject(guard, PipelineStage::Authorization, ApiResponse::from_error(error));
        }

        // Rate limit
        guard.enter(PipelineStage::RateLimit);
        let (identity, tier) = match &user {
            Some(user) => (user.user_id.to_string(), user.tier),
            None => (request.anonymous_identity(), UserTier::Free),
        };
        let decision = self.limiter.check(&identity, tier, route.class);
        if !decision.allowed {
            let retry_after = decision.retry_after_secs(self.clock.now());
            return self.reject(
                guard,
                PipelineStage::RateLimit,
                ApiResponse::rate_limited(decision, retry_after),
            );
        }

        // Handler
        guard.enter(PipelineStage::Handler);
        let ctx = MiddlewareContext::new(request_id, user, started_at, Some(decision));
        guard.attach(Arc::clone(ctx.metrics()));

        let outcome = AssertUnwindSafe(async move { handler(ctx, body).await })
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(body)) => ApiResponse::Success {
                status: route.success_status,
                body,
                rate_limit: Some(decision),
            },
            Ok(Err(error)) => {
                if error.status_code().is_server_error() {
                    tracing::error!(code = %error.code, message = %error.message, "Handler failed");
                }
                ApiResponse::from_error(error)
            }
            Err(payload) => {
                tracing::error!(panic = %panic_message(payload.as_ref()), "Handler panicked");
                ApiResponse::InternalError(ApiError::internal_error("Internal server error"))
            }
        };

        let rejected_at = (!response.is_success()).then_some(PipelineStage::Handler);
        guard.finish(response.status(), rejected_at);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApiKeyGrant, AuthConfig, CredentialAuthenticator};
    use crate::config::{MetricsConfig, Quota, RateLimitPolicy};
    use crate::error::ErrorCode;
    use axum::http::Method;
    use coverline_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Harness {
        pipeline: Pipeline,
        recorder: Arc<MetricsRecorder>,
        clock: Arc<ManualClock>,
        user: Uuid,
    }

    fn harness(tier: UserTier) -> ApiResult<Harness> {
        let clock = Arc::new(ManualClock::at_epoch_2024());
        let user = Uuid::now_v7();
        let auth = AuthConfig::default().with_api_key(
            "key",
            ApiKeyGrant {
                user_id: user,
                tier,
                roles: vec![],
            },
        );
        let recorder = Arc::new(MetricsRecorder::new(MetricsConfig::default(), clock.clone())?);
        let limiter = Arc::new(RateLimiter::new(
            RateLimitPolicy::uniform(Quota::per_minute(2)),
            clock.clone(),
        ));
        Ok(Harness {
            pipeline: Pipeline::new(
                Arc::new(CredentialAuthenticator::new(auth)),
                limiter,
                Arc::clone(&recorder),
                clock.clone(),
            ),
            recorder,
            clock,
            user,
        })
    }

    fn get() -> PipelineRequest {
        PipelineRequest::new(Method::GET, "/x").header("x-api-key", "key")
    }

    #[test]
    fn test_access_rules() {
        let user = AuthenticatedUser {
            user_id: Uuid::now_v7(),
            tier: UserTier::Pro,
            roles: vec!["support".to_string()],
            method: crate::auth::AuthMethod::ApiKey,
        };
        assert!(AccessRule::Public.authorize(None).is_ok());
        assert!(AccessRule::Authenticated.authorize(None).is_err());
        assert!(AccessRule::MinTier(UserTier::Pro).authorize(Some(&user)).is_ok());
        assert!(AccessRule::MinTier(UserTier::Enterprise).authorize(Some(&user)).is_err());
        assert!(AccessRule::Role("support").authorize(Some(&user)).is_ok());
        assert!(AccessRule::Role("admin").authorize(Some(&user)).is_err());
    }

    #[tokio::test]
    async fn test_success_passes_value_and_context() -> ApiResult<()> {
        let h = harness(UserTier::Pro)?;
        let route = RouteSpec::new("/x", RouteClass::General);
        let response = h
            .pipeline
            .handle(&route, get(), |ctx: MiddlewareContext, _: NoBody| async move {
                ctx.metrics().record_cache_hit(true);
                ctx.require_user().map(|user| user.user_id)
            })
            .await;

        assert_eq!(response.into_result()?, h.user);
        let samples = h.recorder.samples_in(std::time::Duration::from_secs(60));
        assert_eq!(samples.len(), 1);
        assert!(samples[0].success());
        assert_eq!(samples[0].cache_hit, Some(true));
        assert_eq!(samples[0].tier, Some(UserTier::Pro));
        assert_eq!(samples[0].rejected_at, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_duration_measured_on_injected_clock() -> ApiResult<()> {
        let h = harness(UserTier::Pro)?;
        let route = RouteSpec::new("/x", RouteClass::General);
        let clock = Arc::clone(&h.clock);
        let response = h
            .pipeline
            .handle(&route, get(), |_ctx, _: NoBody| async move {
                clock.advance(std::time::Duration::from_millis(250));
                Ok(())
            })
            .await;

        assert!(response.is_success());
        let samples = h.recorder.samples_in(std::time::Duration::from_secs(60));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].duration_ms, 250.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_handler_error_is_routed_by_code() -> ApiResult<()> {
        let h = harness(UserTier::Free)?;
        let route = RouteSpec::new("/x", RouteClass::General);
        let response: ApiResponse<()> = h
            .pipeline
            .handle(&route, get(), |_ctx, _: NoBody| async {
                Err(ApiError::not_found("letter"))
            })
            .await;

        assert!(matches!(response, ApiResponse::NotFound(_)));
        let samples = h.recorder.samples_in(std::time::Duration::from_secs(60));
        assert_eq!(samples[0].status_code, 404);
        assert_eq!(samples[0].rejected_at, Some(PipelineStage::Handler));
        Ok(())
    }

    #[tokio::test]
    async fn test_anonymous_public_route_is_limited_per_ip() -> ApiResult<()> {
        let h = harness(UserTier::Free)?;
        let route = RouteSpec::new("/public", RouteClass::General).public();
        let request = || {
            PipelineRequest::new(Method::GET, "/public").client_ip([192, 0, 2, 1].into())
        };

        for _ in 0..2 {
            let ok = h
                .pipeline
                .handle(&route, request(), |_ctx, _: NoBody| async { Ok("hi") })
                .await;
            assert!(ok.is_success());
        }
        let limited = h
            .pipeline
            .handle(&route, request(), |_ctx, _: NoBody| async { Ok("hi") })
            .await;
        assert_eq!(limited.error().map(|e| e.code), Some(ErrorCode::RateLimited));

        let other_ip = h
            .pipeline
            .handle(
                &route,
                PipelineRequest::new(Method::GET, "/public").client_ip([192, 0, 2, 2].into()),
                |_ctx, _: NoBody| async { Ok("hi") },
            )
            .await;
        assert!(other_ip.is_success());
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_request_still_records_sample() -> ApiResult<()> {
        let h = harness(UserTier::Free)?;
        let route = RouteSpec::new("/slow", RouteClass::General);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let fut = h.pipeline.handle(&route, get(), move |_ctx, _: NoBody| async move {
            seen.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<ApiResult<()>>().await
        });
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), fut).await.is_err();

        assert!(timed_out);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let samples = h.recorder.samples_in(std::time::Duration::from_secs(60));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].status_code, 499);
        assert_eq!(samples[0].rejected_at, Some(PipelineStage::Handler));
        assert!(!samples[0].success());
        Ok(())
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
