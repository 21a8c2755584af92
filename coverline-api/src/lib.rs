//! Coverline API - Request Middleware Core
//!
//! The HTTP layer of Coverline. Every application route runs through one
//! [`Pipeline`]: body validation against a JSON Schema, credential
//! authentication (API key or JWT), tier and role authorization, a tiered
//! fixed-window [`RateLimiter`], and finally the handler with a fresh
//! [`MiddlewareContext`]. Each request produces exactly one
//! [`RequestMetricsSample`](coverline_core::RequestMetricsSample) in the
//! [`MetricsRecorder`], which also serves dashboards and Prometheus metrics.
//!
//! Cover letter reads go through the multi-level cache in `coverline-cache`.

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod validation;

pub use auth::{
    generate_jwt_token, validate_jwt_token, ApiKeyGrant, AuthConfig, AuthMethod,
    AuthenticatedUser, Authenticator, Claims, CredentialAuthenticator, JwtSecret,
};
pub use config::{AppConfig, MetricsConfig, Quota, RateLimitPolicy};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{
    AccessRule, ApiResponse, MiddlewareContext, NoBody, Pipeline, PipelineRequest,
    RateLimitDecision, RateLimiter, RouteSpec,
};
pub use routes::create_router;
pub use state::AppState;
pub use store::{CoverLetter, CoverLetterPage, CoverLetterStore, InMemoryCoverLetterStore};
pub use telemetry::{DashboardMetrics, MetricsRecorder, PrometheusMetrics};
pub use validation::RequestSchema;
