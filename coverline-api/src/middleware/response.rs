//! Tagged response union produced by the pipeline.

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::middleware::rate_limit::RateLimitDecision;
use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Every outcome of [`Pipeline::handle`](crate::middleware::Pipeline::handle).
///
/// Rendered exhaustively by `IntoResponse`; error variants carry the JSON body.
#[derive(Debug)]
pub enum ApiResponse<T> {
    Success {
        status: StatusCode,
        body: T,
        rate_limit: Option<RateLimitDecision>,
    },
    ValidationError(ApiError),
    Unauthorized(ApiError),
    Forbidden(ApiError),
    NotFound(ApiError),
    RateLimited {
        error: ApiError,
        retry_after_secs: u64,
        decision: Option<RateLimitDecision>,
    },
    InternalError(ApiError),
}

impl<T> ApiResponse<T> {
    /// Route an error to its variant. Internal-only codes become `InternalError`.
    pub fn from_error(error: ApiError) -> Self {
        match error.code {
            ErrorCode::ValidationError => ApiResponse::ValidationError(error),
            ErrorCode::Unauthorized => ApiResponse::Unauthorized(error),
            ErrorCode::Forbidden => ApiResponse::Forbidden(error),
            ErrorCode::NotFound => ApiResponse::NotFound(error),
            ErrorCode::RateLimited => {
                let retry_after_secs = error
                    .details
                    .as_ref()
                    .and_then(|d| d.get("retry_after_secs"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1);
                ApiResponse::RateLimited {
                    error,
                    retry_after_secs,
                    decision: None,
                }
            }
            ErrorCode::CacheDegraded | ErrorCode::InternalError => {
                ApiResponse::InternalError(error.into_public())
            }
        }
    }

    /// Rejection for an exhausted quota.
    pub fn rate_limited(decision: RateLimitDecision, retry_after_secs: u64) -> Self {
        ApiResponse::RateLimited {
            error: ApiError::rate_limited(retry_after_secs),
            retry_after_secs,
            decision: Some(decision),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiResponse::Success { status, .. } => *status,
            ApiResponse::ValidationError(e)
            | ApiResponse::Unauthorized(e)
            | ApiResponse::Forbidden(e)
            | ApiResponse::NotFound(e)
            | ApiResponse::InternalError(e)
            | ApiResponse::RateLimited { error: e, .. } => e.status_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success { .. })
    }

    pub fn error(&self) -> Option<&ApiError> {
        match self {
            ApiResponse::Success { .. } => None,
            ApiResponse::ValidationError(e)
            | ApiResponse::Unauthorized(e)
            | ApiResponse::Forbidden(e)
            | ApiResponse::NotFound(e)
            | ApiResponse::InternalError(e)
            | ApiResponse::RateLimited { error: e, .. } => Some(e),
        }
    }

    pub fn into_result(self) -> ApiResult<T> {
        match self {
            ApiResponse::Success { body, .. } => Ok(body),
            ApiResponse::ValidationError(e)
            | ApiResponse::Unauthorized(e)
            | ApiResponse::Forbidden(e)
            | ApiResponse::NotFound(e)
            | ApiResponse::InternalError(e)
            | ApiResponse::RateLimited { error: e, .. } => Err(e),
        }
    }
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_at.timestamp()));
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success {
                status,
                body,
                rate_limit,
            } => {
                let mut response = if status == StatusCode::NO_CONTENT {
                    status.into_response()
                } else {
                    (status, Json(body)).into_response()
                };
                if let Some(decision) = rate_limit {
                    insert_rate_limit_headers(response.headers_mut(), &decision);
                }
                response
            }
            ApiResponse::RateLimited {
                error,
                retry_after_secs,
                decision,
            } => {
                let mut response = error.into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                if let Some(decision) = decision {
                    insert_rate_limit_headers(headers, &decision);
                }
                response
            }
            ApiResponse::ValidationError(e)
            | ApiResponse::Unauthorized(e)
            | ApiResponse::Forbidden(e)
            | ApiResponse::NotFound(e)
            | ApiResponse::InternalError(e) => e.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_from_error_routes_variants() {
        let r: ApiResponse<()> = ApiResponse::from_error(ApiError::not_found("gone"));
        assert!(matches!(r, ApiResponse::NotFound(_)));
        assert_eq!(r.status(), StatusCode::NOT_FOUND);

        let r: ApiResponse<()> = ApiResponse::from_error(ApiError::cache_degraded("lmdb"));
        let code = r.error().map(|e| e.code);
        assert_eq!(code, Some(ErrorCode::InternalError));

        let r: ApiResponse<()> = ApiResponse::from_error(ApiError::rate_limited(9));
        assert!(matches!(r, ApiResponse::RateLimited { retry_after_secs: 9, .. }));
    }

    #[test]
    fn test_rate_limited_headers() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 3,
            remaining: 0,
            reset_at: Utc.timestamp_opt(1_704_067_260, 0).single().unwrap_or_default(),
        };
        let response = ApiResponse::<()>::rate_limited(decision, 60).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()), Some("60"));
        assert_eq!(headers.get(RATE_LIMIT_LIMIT).and_then(|v| v.to_str().ok()), Some("3"));
        assert_eq!(
            headers.get(RATE_LIMIT_RESET).and_then(|v| v.to_str().ok()),
            Some("1704067260")
        );
    }

    #[test]
    fn test_no_content_has_empty_body() {
        let response = ApiResponse::Success {
            status: StatusCode::NO_CONTENT,
            body: (),
            rate_limit: None,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_into_result() {
        let ok: ApiResponse<u8> = ApiResponse::Success {
            status: StatusCode::OK,
            body: 4,
            rate_limit: None,
        };
        assert_eq!(ok.into_result(), Ok(4));
        let err: ApiResponse<u8> = ApiResponse::Forbidden(ApiError::forbidden("no"));
        assert!(err.into_result().is_err());
    }
}
