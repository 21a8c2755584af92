//! REST API Routes Module
//!
//! - Cover letter CRUD (cache-backed reads, invalidating writes)
//! - Metrics dashboard and the caller's activity feed
//! - Admin cache inspection and flush
//! - Liveness probe and Prometheus scrape endpoint, both outside the pipeline

pub mod admin;
pub mod cover_letters;
pub mod dashboard;
pub mod health;
pub mod metrics;

use axum::Router;

use crate::state::AppState;
use crate::telemetry::trace_layer;

pub use admin::create_router as admin_router;
pub use cover_letters::create_router as cover_letter_router;
pub use dashboard::create_router as dashboard_router;
pub use health::create_router as health_router;
pub use metrics::create_router as metrics_router;

/// Assemble the full application router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/cover-letters", cover_letter_router())
        .nest("/admin", admin_router())
        .merge(dashboard_router());

    Router::new()
        .nest("/health", health_router())
        .merge(metrics_router())
        .nest("/api/v1", api)
        .layer(trace_layer())
        .with_state(state)
}
