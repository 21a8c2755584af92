//! Health Check Endpoints
//!
//! Liveness only. No authentication, rate limiting or metrics samples.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    /// Name of the remote cache tier in use.
    pub cache_remote: String,
}

/// GET /health/live - Process liveness check
pub async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_remote: state.cache.remote_name().to_string(),
    };
    (StatusCode::OK, Json(response))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/live", get(liveness))
}
