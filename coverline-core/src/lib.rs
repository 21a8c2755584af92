//! Coverline Core - Shared Types
//!
//! Pure data structures shared by the cache, API and test-utility crates:
//! subscription tiers, route classes, the injectable clock, error enums and
//! the request-metrics sample model. No I/O lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod clock;
pub mod error;
pub mod metrics;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, ConfigError, CoverlineError, CoverlineResult};
pub use metrics::{
    ActivityKind, PipelineStage, RequestMetricsSample, StatusCategory, UserActivityEvent,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Request identifier using UUIDv7 so ids sort by creation time.
pub type RequestId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 request id.
pub fn new_request_id() -> RequestId {
    Uuid::now_v7()
}

// ============================================================================
// ENUMS
// ============================================================================

/// Subscription level of a user. Determines rate-limit quotas.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl UserTier {
    pub const ALL: [UserTier; 3] = [UserTier::Free, UserTier::Pro, UserTier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserTier::Free => "free",
            UserTier::Pro => "pro",
            UserTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for UserTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(UserTier::Free),
            "pro" => Ok(UserTier::Pro),
            "enterprise" => Ok(UserTier::Enterprise),
            other => Err(ConfigError::InvalidValue {
                field: "tier".to_string(),
                value: other.to_string(),
                reason: "expected free, pro or enterprise".to_string(),
            }),
        }
    }
}

/// Category of endpoint with its own rate-limit policy.
///
/// `Save` and `Generate` are the expensive operations and get tighter quotas
/// than `General` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    General,
    Save,
    Generate,
}

impl RouteClass {
    pub const ALL: [RouteClass; 3] = [RouteClass::General, RouteClass::Save, RouteClass::Generate];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::General => "general",
            RouteClass::Save => "save",
            RouteClass::Generate => "generate",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "general" => Ok(RouteClass::General),
            "save" => Ok(RouteClass::Save),
            "generate" => Ok(RouteClass::Generate),
            other => Err(ConfigError::InvalidValue {
                field: "route_class".to_string(),
                value: other.to_string(),
                reason: "expected general, save or generate".to_string(),
            }),
        }
    }
}
