//! Coverline Telemetry - Observability Infrastructure
//!
//! Request-metrics recorder with dashboards, per-instance Prometheus
//! metrics, tracing subscriber setup and HTTP access-log spans.

pub mod http;
pub mod prometheus;
pub mod recorder;
pub mod tracer;

pub use http::{normalize_path, trace_layer};
pub use prometheus::PrometheusMetrics;
pub use recorder::{
    percentile, summarize, ActivitySummary, DashboardMetrics, LatencySummary, MetricsRecorder,
    RouteSummary, UserActivityCount,
};
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
