//! Prometheus Metrics Definitions
//!
//! Every recorder owns its own `Registry`, so tests and multiple app
//! instances in one process never collide on metric names.

use coverline_cache::CacheStats;
use coverline_core::{PipelineStage, RequestMetricsSample, UserActivityEvent};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Database time buckets (seconds)
const DB_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Container for all Coverline metrics.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,

    /// HTTP request counter - labels: method, route, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, route
    pub http_request_duration_seconds: HistogramVec,

    /// Database time per request - labels: route
    pub db_query_duration_seconds: HistogramVec,

    /// Requests rejected before the handler - labels: stage
    pub pipeline_rejections_total: CounterVec,

    /// Handler cache outcomes - labels: result (hit/miss)
    pub request_cache_total: CounterVec,

    /// User activity events - labels: kind
    pub user_activity_total: CounterVec,

    /// Cache counters mirrored at scrape time - labels: counter
    pub cache_stats: IntGaugeVec,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

fn register_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl PrometheusMetrics {
    /// Create and register all metrics with a fresh registry.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new_custom(Some("coverline".to_string()), None)
            .map_err(|e| register_error("registry", e))?;

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "route", "status"],
        )
        .map_err(|e| register_error("http_requests_total", e))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
                .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "route"],
        )
        .map_err(|e| register_error("http_request_duration_seconds", e))?;

        let db_query_duration_seconds = HistogramVec::new(
            HistogramOpts::new("db_query_duration_seconds", "Store time per request in seconds")
                .buckets(DB_LATENCY_BUCKETS.to_vec()),
            &["route"],
        )
        .map_err(|e| register_error("db_query_duration_seconds", e))?;

        let pipeline_rejections_total = CounterVec::new(
            Opts::new("pipeline_rejections_total", "Requests rejected by a pipeline stage"),
            &["stage"],
        )
        .map_err(|e| register_error("pipeline_rejections_total", e))?;

        let request_cache_total = CounterVec::new(
            Opts::new("request_cache_total", "Requests served with or without a cache hit"),
            &["result"],
        )
        .map_err(|e| register_error("request_cache_total", e))?;

        let user_activity_total = CounterVec::new(
            Opts::new("user_activity_total", "User activity events by kind"),
            &["kind"],
        )
        .map_err(|e| register_error("user_activity_total", e))?;

        let cache_stats = IntGaugeVec::new(
            Opts::new("cache_stats", "Multi-level cache counters"),
            &["counter"],
        )
        .map_err(|e| register_error("cache_stats", e))?;

        registry
            .register(Box::new(http_requests_total.clone()))
            .map_err(|e| register_error("http_requests_total", e))?;
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .map_err(|e| register_error("http_request_duration_seconds", e))?;
        registry
            .register(Box::new(db_query_duration_seconds.clone()))
            .map_err(|e| register_error("db_query_duration_seconds", e))?;
        registry
            .register(Box::new(pipeline_rejections_total.clone()))
            .map_err(|e| register_error("pipeline_rejections_total", e))?;
        registry
            .register(Box::new(request_cache_total.clone()))
            .map_err(|e| register_error("request_cache_total", e))?;
        registry
            .register(Box::new(user_activity_total.clone()))
            .map_err(|e| register_error("user_activity_total", e))?;
        registry
            .register(Box::new(cache_stats.clone()))
            .map_err(|e| register_error("cache_stats", e))?;

        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(
                prometheus::process_collector::ProcessCollector::for_self(),
            ))
            .map_err(|e| register_error("process_collector", e))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            db_query_duration_seconds,
            pipeline_rejections_total,
            request_cache_total,
            user_activity_total,
            cache_stats,
        })
    }

    /// Record a finalised request sample.
    pub fn observe_sample(&self, sample: &RequestMetricsSample) {
        let status = sample.status_code.to_string();
        self.http_requests_total
            .with_label_values(&[sample.method.as_str(), sample.route.as_str(), status.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[sample.method.as_str(), sample.route.as_str()])
            .observe(sample.duration_ms / 1000.0);

        if let Some(db_ms) = sample.db_query_time_ms {
            self.db_query_duration_seconds
                .with_label_values(&[sample.route.as_str()])
                .observe(db_ms / 1000.0);
        }
        if let Some(hit) = sample.cache_hit {
            let result = if hit { "hit" } else { "miss" };
            self.request_cache_total.with_label_values(&[result]).inc();
        }
        if let Some(stage) = sample.rejected_at.filter(|s| *s != PipelineStage::Handler) {
            self.pipeline_rejections_total
                .with_label_values(&[stage.as_str()])
                .inc();
        }
    }

    pub fn observe_activity(&self, event: &UserActivityEvent) {
        self.user_activity_total
            .with_label_values(&[event.kind.label()])
            .inc();
    }

    /// Mirror the cache's cumulative counters into gauges.
    pub fn set_cache_stats(&self, stats: &CacheStats) {
        let gauges = [
            ("memory_hits", stats.memory_hits),
            ("remote_hits", stats.remote_hits),
            ("misses", stats.misses),
            ("backfills", stats.backfills),
            ("remote_errors", stats.remote_errors),
            ("evictions", stats.evictions),
            ("memory_entries", stats.memory_entries),
        ];
        for (name, value) in gauges {
            self.cache_stats
                .with_label_values(&[name])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> ApiResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| ApiError::internal_error(format!("Metrics are not UTF-8: {}", e)))
    }
}
