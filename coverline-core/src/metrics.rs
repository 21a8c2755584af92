//! Request metrics and user-activity data model.
//!
//! Samples are created at request entry, finalised once when the response is
//! emitted and never mutated afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::{RequestId, Timestamp, UserTier};

/// Coarse outcome of a request derived from its HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Success,
    ClientError,
    ServerError,
}

impl StatusCategory {
    /// Classify an HTTP status code. Anything below 400 counts as success.
    pub fn from_status(status: u16) -> Self {
        match status {
            0..=399 => StatusCategory::Success,
            400..=499 => StatusCategory::ClientError,
            _ => StatusCategory::ServerError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCategory::Success => "success",
            StatusCategory::ClientError => "client_error",
            StatusCategory::ServerError => "server_error",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Middleware stage that short-circuited a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validation,
    Authentication,
    Authorization,
    RateLimit,
    Handler,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Validation,
        PipelineStage::Authentication,
        PipelineStage::Authorization,
        PipelineStage::RateLimit,
        PipelineStage::Handler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Validation => "validation",
            PipelineStage::Authentication => "authentication",
            PipelineStage::Authorization => "authorization",
            PipelineStage::RateLimit => "rate_limit",
            PipelineStage::Handler => "handler",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finalised request measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetricsSample {
    pub request_id: RequestId,
    /// Route template (e.g. `/api/v1/cover-letters/{id}`), never the raw path.
    pub route: String,
    pub method: String,
    pub started_at: Timestamp,
    pub duration_ms: f64,
    pub status_category: StatusCategory,
    pub status_code: u16,
    /// `None` when the handler never consulted the cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_query_time_ms: Option<f64>,
    /// Stage that rejected the request. Handler errors and panics are tagged
    /// `Handler`; `None` only for successful responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<PipelineStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<UserTier>,
}

impl RequestMetricsSample {
    /// True when the response status is below 400.
    pub fn success(&self) -> bool {
        self.status_category == StatusCategory::Success
    }
}

/// Kind of product-level user action.
///
/// Serialised as its label; unknown labels deserialise to `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ActivityKind {
    CoverLetterGenerated,
    CoverLetterSaved,
    CoverLetterUpdated,
    CoverLetterDeleted,
    ProfileUpdated,
    Custom(String),
}

impl ActivityKind {
    /// Stable label for aggregation and Prometheus.
    pub fn label(&self) -> &str {
        match self {
            ActivityKind::CoverLetterGenerated => "cover_letter_generated",
            ActivityKind::CoverLetterSaved => "cover_letter_saved",
            ActivityKind::CoverLetterUpdated => "cover_letter_updated",
            ActivityKind::CoverLetterDeleted => "cover_letter_deleted",
            ActivityKind::ProfileUpdated => "profile_updated",
            ActivityKind::Custom(name) => name.as_str(),
        }
    }
}

impl From<ActivityKind> for String {
    fn from(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::Custom(name) => name,
            other => other.label().to_string(),
        }
    }
}

impl From<String> for ActivityKind {
    fn from(label: String) -> Self {
        match label.as_str() {
            "cover_letter_generated" => ActivityKind::CoverLetterGenerated,
            "cover_letter_saved" => ActivityKind::CoverLetterSaved,
            "cover_letter_updated" => ActivityKind::CoverLetterUpdated,
            "cover_letter_deleted" => ActivityKind::CoverLetterDeleted,
            "profile_updated" => ActivityKind::ProfileUpdated,
            _ => ActivityKind::Custom(label),
        }
    }
}

/// A user action recorded on the activity stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivityEvent {
    pub user_id: Uuid,
    pub kind: ActivityKind,
    pub occurred_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl UserActivityEvent {
    pub fn new(user_id: Uuid, kind: ActivityKind, occurred_at: Timestamp) -> Self {
        Self {
            user_id,
            kind,
            occurred_at,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
