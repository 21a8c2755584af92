//! Prometheus scrape endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::state::AppState;

/// GET /metrics - Text exposition of the recorder's registry
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let prometheus = state.recorder().prometheus();
    prometheus.set_cache_stats(&state.cache.stats());

    match prometheus.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            e.into_response()
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_handler))
}
