//! Error Types for Coverline API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON `{"code", "message", "details"?}` with
//! the matching HTTP status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coverline_core::{CacheError, ConfigError, CoverlineError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code. `CacheDegraded` is an
/// internal signal only and is rendered as `INTERNAL_ERROR` if it ever reaches
/// the response boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request body is malformed or fails its schema
    ValidationError,

    /// Request lacks valid authentication credentials
    Unauthorized,

    /// Request is authenticated but the route needs a higher tier or a role
    Forbidden,

    /// Requested resource does not exist
    NotFound,

    /// Quota for the caller's tier and route class is exhausted
    RateLimited,

    /// Remote cache tier unavailable; never shown to callers
    CacheDegraded,

    /// Unexpected handler failure
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::CacheDegraded | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "Request validation failed",
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Insufficient permissions",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::RateLimited => "Rate limit exceeded",
            ErrorCode::CacheDegraded => "Cache degraded to memory-only",
            ErrorCode::InternalError => "Internal server error",
        }
    }

    /// True for codes that may appear in a response body.
    pub fn is_public(&self) -> bool {
        !matches!(self, ErrorCode::CacheDegraded)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (schema violations, retry hints)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    /// The form of this error that is safe to send to a caller.
    ///
    /// Internal-only codes collapse into a generic `INTERNAL_ERROR`.
    pub fn into_public(self) -> Self {
        if self.code.is_public() {
            self
        } else {
            tracing::error!(code = %self.code, message = %self.message, "Internal error reached response boundary");
            ApiError::from_code(ErrorCode::InternalError)
        }
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create a ValidationError error.
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create an Unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a Forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Create a NotFound error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create a NotFound error for a specific entity.
    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    /// Create a RateLimited error with a retry hint.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(
            ErrorCode::RateLimited,
            format!("Rate limit exceeded. Retry after {} seconds", retry_after_secs),
        )
        .with_details(serde_json::json!({ "retry_after_secs": retry_after_secs }))
    }

    /// Create a CacheDegraded error.
    pub fn cache_degraded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheDegraded, message)
    }

    /// Create an InternalError error.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Implement IntoResponse for ApiError to enable automatic error handling in Axum.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let public = self.into_public();
        let status = public.status_code();
        (status, Json(public)).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM LIBRARY ERRORS
// ============================================================================

/// Convert from CoverlineError to ApiError.
impl From<CoverlineError> for ApiError {
    fn from(err: CoverlineError) -> Self {
        match err {
            CoverlineError::Cache(cache) if cache.is_remote() => {
                tracing::warn!(error = %cache, "Remote cache failure surfaced to handler");
                ApiError::cache_degraded(cache.to_string())
            }
            CoverlineError::Cache(CacheError::MemoryUnavailable { reason }) => {
                tracing::error!(%reason, "Memory cache tier unavailable");
                ApiError::internal_error("Cache unavailable")
            }
            other => {
                tracing::error!(error = %other, "Unhandled library error");
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

/// Convert from CacheError to ApiError.
impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::from(CoverlineError::Cache(err))
    }
}

/// Convert from ConfigError to ApiError.
impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::from(CoverlineError::Config(err))
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::debug!("JSON error: {:?}", err);
        ApiError::validation_error(format!("Invalid JSON: {}", err))
    }
}

/// Convert from uuid::Error to ApiError.
impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::validation_error(format!("Invalid id: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::ValidationError.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::InternalError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_constructors() {
        let err = ApiError::unauthorized("Invalid credentials");
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.message, "Invalid credentials");

        let err = ApiError::entity_not_found("Cover letter", "123");
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(err.message.contains("Cover letter"));
        assert!(err.message.contains("123"));

        let err = ApiError::rate_limited(42);
        assert_eq!(err.details, Some(serde_json::json!({ "retry_after_secs": 42 })));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::validation_error("bad body");
        let json = serde_json::to_value(&err)?;
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["message"], "bad body");
        assert!(json.get("details").is_none());

        let back: ApiError = serde_json::from_value(json)?;
        assert_eq!(back, err);
        Ok(())
    }

    #[test]
    fn test_cache_degraded_is_never_public() {
        let err = ApiError::cache_degraded("lmdb down").into_public();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(!err.message.contains("lmdb"));
        assert_eq!(
            ApiError::cache_degraded("x").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_coverline_error() {
        let remote = CoverlineError::Cache(CacheError::Remote {
            tier: "lmdb".into(),
            reason: "io".into(),
        });
        assert_eq!(ApiError::from(remote).code, ErrorCode::CacheDegraded);

        let store = CoverlineError::Store {
            reason: "connection reset".into(),
        };
        let err = ApiError::from(store);
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(!err.message.contains("connection reset"));
    }

    #[test]
    fn test_error_display() {
        let display = ApiError::forbidden("pro tier required").to_string();
        assert!(display.contains("Forbidden"));
        assert!(display.contains("pro tier required"));
    }
}
