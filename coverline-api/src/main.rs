//! Coverline API Server Entry Point
//!
//! Reads configuration from the environment, opens the cache tiers and
//! starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use coverline_api::telemetry::{init_tracing, TelemetryConfig};
use coverline_api::{
    create_router, ApiError, ApiResult, AppConfig, AppState, AuthConfig, InMemoryCoverLetterStore,
    MetricsConfig, RateLimitPolicy,
};
use coverline_cache::{CacheConfig, LmdbRemoteTier, MultiLevelCache, NullRemoteTier, RemoteTier};
use coverline_core::{Clock, SystemClock};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env();
    init_tracing(&telemetry_config)?;

    let app_config = AppConfig::from_env();
    let auth_config = AuthConfig::from_env();
    if auth_config.jwt_secret.is_insecure_default() {
        tracing::warn!("COVERLINE_JWT_SECRET is not set; using the insecure development secret");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let remote = open_remote_tier(&app_config, Arc::clone(&clock));
    let cache = Arc::new(MultiLevelCache::new(
        CacheConfig::from_env(),
        remote,
        Arc::clone(&clock),
    ));

    let state = AppState::new(
        auth_config,
        RateLimitPolicy::from_env(),
        MetricsConfig::from_env(),
        cache,
        Arc::new(InMemoryCoverLetterStore::new()),
        clock,
    )?;
    let sweeper = state
        .limiter()
        .spawn_sweeper(app_config.rate_limit_sweep_interval);

    let app = create_router(state);

    let addr = app_config.bind_addr()?;
    tracing::info!(
        %addr,
        service = %telemetry_config.service_name,
        environment = %telemetry_config.environment,
        "Starting Coverline API server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    sweeper.abort();
    Ok(())
}

/// LMDB when a path is configured, otherwise a memory-only cache.
///
/// A tier that fails to open is logged and replaced by the null tier so the
/// server still starts.
fn open_remote_tier(config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<dyn RemoteTier> {
    let Some(path) = &config.lmdb_path else {
        tracing::info!("COVERLINE_LMDB_PATH not set; running with a memory-only cache");
        return Arc::new(NullRemoteTier);
    };

    match LmdbRemoteTier::open(path, config.lmdb_max_size_mb, clock) {
        Ok(tier) => {
            let tier = Arc::new(tier);
            spawn_lmdb_purge(Arc::clone(&tier), config.lmdb_purge_interval);
            tier as Arc<dyn RemoteTier>
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to open LMDB cache tier; falling back to memory-only"
            );
            Arc::new(NullRemoteTier)
        }
    }
}

/// Periodically drop expired LMDB entries.
fn spawn_lmdb_purge(tier: Arc<LmdbRemoteTier>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match tier.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired LMDB cache entries"),
                Err(e) => tracing::warn!(error = %e, "LMDB purge failed"),
            }
        }
    });
}
