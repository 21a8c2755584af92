//! Request middleware: the staged pipeline and the pieces it composes.

pub mod context;
pub mod pipeline;
pub mod rate_limit;
pub mod request;
pub mod response;

pub use context::{MiddlewareContext, RequestMetrics};
pub use pipeline::{AccessRule, NoBody, Pipeline, RouteSpec};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use request::{extract_client_ip, PipelineRequest, MAX_BODY_BYTES};
pub use response::{ApiResponse, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET};
