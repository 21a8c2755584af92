//! Rolling request-metrics and user-activity recorder.
//!
//! Samples land in a bounded `VecDeque` evicted by capacity and retention.
//! Dashboards copy the in-range samples out under a short lock and compute
//! everything on the copy.

use crate::config::MetricsConfig;
use crate::error::ApiResult;
use crate::telemetry::prometheus::PrometheusMetrics;
use coverline_core::clock::to_chrono;
use coverline_core::{
    Clock, PipelineStage, RequestMetricsSample, StatusCategory, Timestamp, UserActivityEvent,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Routes and users listed in "top" rollups.
const TOP_N: usize = 5;

// ============================================================================
// DASHBOARD TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    pub route: String,
    pub requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
}

/// Windowed rollup over recorded samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub range_secs: u64,
    pub generated_at: Timestamp,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    /// Non-success samples over all samples.
    pub error_rate: f64,
    pub client_error_rate: f64,
    pub server_error_rate: f64,
    pub latency: LatencySummary,
    /// Requests per second over the range.
    pub throughput_rps: f64,
    /// Hits over samples that touched the cache; `None` if none did.
    pub cache_hit_rate: Option<f64>,
    pub avg_db_time_ms: Option<f64>,
    /// Pipeline rejections keyed by stage.
    pub rejections: BTreeMap<String, u64>,
    pub top_routes: Vec<RouteSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserActivityCount {
    pub user_id: Uuid,
    pub events: u64,
}

/// Windowed rollup over user-activity events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub range_secs: u64,
    pub total_events: u64,
    pub unique_users: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub most_active_users: Vec<UserActivityCount>,
}

// ============================================================================
// PURE ROLLUPS
// ============================================================================

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Nearest-rank percentile over ascending `sorted`; 0.0 when empty.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn latency_summary(samples: &[RequestMetricsSample]) -> LatencySummary {
    let mut durations: Vec<f64> = samples.iter().map(|s| s.duration_ms).collect();
    durations.sort_by(|a, b| a.total_cmp(b));
    let avg_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };
    LatencySummary {
        avg_ms,
        p50_ms: percentile(&durations, 50.0),
        p95_ms: percentile(&durations, 95.0),
        p99_ms: percentile(&durations, 99.0),
        max_ms: durations.last().copied().unwrap_or(0.0),
    }
}

fn top_routes(samples: &[RequestMetricsSample]) -> Vec<RouteSummary> {
    let mut by_route: HashMap<&str, (u64, u64, f64)> = HashMap::new();
    for sample in samples {
        let entry = by_route.entry(sample.route.as_str()).or_default();
        entry.0 += 1;
        if !sample.success() {
            entry.1 += 1;
        }
        entry.2 += sample.duration_ms;
    }

    let mut routes: Vec<RouteSummary> = by_route
        .into_iter()
        .map(|(route, (requests, errors, total_ms))| RouteSummary {
            route: route.to_string(),
            requests,
            error_rate: ratio(errors, requests),
            avg_latency_ms: total_ms / requests as f64,
        })
        .collect();
    routes.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.route.cmp(&b.route)));
    routes.truncate(TOP_N);
    routes
}

/// Compute a dashboard from samples already filtered to the range.
pub fn summarize(
    samples: &[RequestMetricsSample],
    range: Duration,
    generated_at: Timestamp,
) -> DashboardMetrics {
    let total = samples.len() as u64;
    let count = |category: StatusCategory| {
        samples
            .iter()
            .filter(|s| s.status_category == category)
            .count() as u64
    };
    let successful = count(StatusCategory::Success);
    let client_errors = count(StatusCategory::ClientError);
    let server_errors = count(StatusCategory::ServerError);

    let cache_samples: Vec<bool> = samples.iter().filter_map(|s| s.cache_hit).collect();
    let cache_hit_rate = (!cache_samples.is_empty()).then(|| {
        ratio(
            cache_samples.iter().filter(|hit| **hit).count() as u64,
            cache_samples.len() as u64,
        )
    });

    let db_times: Vec<f64> = samples.iter().filter_map(|s| s.db_query_time_ms).collect();
    let avg_db_time_ms =
        (!db_times.is_empty()).then(|| db_times.iter().sum::<f64>() / db_times.len() as f64);

    let mut rejections: BTreeMap<String, u64> = PipelineStage::ALL
        .iter()
        .map(|stage| (stage.as_str().to_string(), 0))
        .collect();
    for stage in samples.iter().filter_map(|s| s.rejected_at) {
        *rejections.entry(stage.as_str().to_string()).or_default() += 1;
    }

    let range_secs = range.as_secs_f64();
    DashboardMetrics {
        range_secs: range.as_secs(),
        generated_at,
        total_requests: total,
        successful_requests: successful,
        client_errors,
        server_errors,
        error_rate: ratio(total - successful, total),
        client_error_rate: ratio(client_errors, total),
        server_error_rate: ratio(server_errors, total),
        latency: latency_summary(samples),
        throughput_rps: if range_secs > 0.0 {
            total as f64 / range_secs
        } else {
            0.0
        },
        cache_hit_rate,
        avg_db_time_ms,
        rejections,
        top_routes: top_routes(samples),
    }
}

// ============================================================================
// RECORDER
// ============================================================================

/// Bounded, clock-driven metrics store shared by the pipeline and dashboards.
#[derive(Debug)]
pub struct MetricsRecorder {
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    samples: Mutex<VecDeque<RequestMetricsSample>>,
    activity: Mutex<VecDeque<UserActivityEvent>>,
    prometheus: PrometheusMetrics,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cutoff(now: Timestamp, span: Duration) -> Timestamp {
    now.checked_sub_signed(to_chrono(span))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}

impl MetricsRecorder {
    pub fn new(config: MetricsConfig, clock: Arc<dyn Clock>) -> ApiResult<Self> {
        Ok(Self {
            samples: Mutex::new(VecDeque::with_capacity(config.sample_capacity.min(1024))),
            activity: Mutex::new(VecDeque::with_capacity(config.activity_capacity.min(1024))),
            config,
            clock,
            prometheus: PrometheusMetrics::new()?,
        })
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn prometheus(&self) -> &PrometheusMetrics {
        &self.prometheus
    }

    /// Append a finalised sample, evicting by capacity and retention.
    pub fn record(&self, sample: RequestMetricsSample) {
        self.prometheus.observe_sample(&sample);
        let horizon = cutoff(self.clock.now(), self.config.sample_retention);
        let capacity = self.config.sample_capacity.max(1);

        let mut samples = lock(&self.samples);
        while samples.front().is_some_and(|s| s.started_at < horizon) {
            samples.pop_front();
        }
        while samples.len() >= capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Copy of the samples that started within `range` of now.
    pub fn samples_in(&self, range: Duration) -> Vec<RequestMetricsSample> {
        let now = self.clock.now();
        let from = cutoff(now, range.min(self.config.sample_retention));
        let samples = lock(&self.samples);
        samples
            .iter()
            .filter(|s| s.started_at >= from && s.started_at <= now)
            .cloned()
            .collect()
    }

    /// Samples currently buffered, including any past retention not yet evicted.
    pub fn sample_count(&self) -> usize {
        lock(&self.samples).len()
    }

    /// Dashboard over the last `range`.
    pub fn dashboard(&self, range: Duration) -> DashboardMetrics {
        let samples = self.samples_in(range);
        summarize(&samples, range, self.clock.now())
    }

    pub fn record_user_activity(&self, event: UserActivityEvent) {
        self.prometheus.observe_activity(&event);
        let horizon = cutoff(self.clock.now(), self.config.activity_retention);
        let capacity = self.config.activity_capacity.max(1);

        let mut activity = lock(&self.activity);
        while activity.front().is_some_and(|e| e.occurred_at < horizon) {
            activity.pop_front();
        }
        while activity.len() >= capacity {
            activity.pop_front();
        }
        activity.push_back(event);
    }

    fn activity_in(&self, range: Duration) -> Vec<UserActivityEvent> {
        let now = self.clock.now();
        let from = cutoff(now, range.min(self.config.activity_retention));
        let activity = lock(&self.activity);
        activity
            .iter()
            .filter(|e| e.occurred_at >= from && e.occurred_at <= now)
            .cloned()
            .collect()
    }

    /// Most recent events for one user within retention, newest first.
    pub fn recent_activity(&self, user_id: Uuid, limit: usize) -> Vec<UserActivityEvent> {
        let horizon = cutoff(self.clock.now(), self.config.activity_retention);
        let activity = lock(&self.activity);
        activity
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id && e.occurred_at >= horizon)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn activity_count(&self) -> usize {
        lock(&self.activity).len()
    }

    /// Activity rollup over the last `range`.
    pub fn activity_summary(&self, range: Duration) -> ActivitySummary {
        let events = self.activity_in(range);

        let mut by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_user: HashMap<Uuid, u64> = HashMap::new();
        for event in &events {
            *by_kind.entry(event.kind.label().to_string()).or_default() += 1;
            *by_user.entry(event.user_id).or_default() += 1;
        }
        let unique_users = by_user.len() as u64;

        let mut most_active_users: Vec<UserActivityCount> = by_user
            .into_iter()
            .map(|(user_id, events)| UserActivityCount { user_id, events })
            .collect();
        most_active_users.sort_by(|a, b| b.events.cmp(&a.events).then(a.user_id.cmp(&b.user_id)));
        most_active_users.truncate(TOP_N);

        ActivitySummary {
            range_secs: range.as_secs(),
            total_events: events.len() as u64,
            unique_users,
            by_kind,
            most_active_users,
        }
    }

    /// Clamp a requested dashboard range to what the buffer can answer.
    pub fn clamp_range(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.config.default_range)
            .clamp(Duration::from_secs(1), self.config.sample_retention.max(Duration::from_secs(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coverline_core::{ActivityKind, ManualClock, StatusCategory};

    fn sample(status: u16, duration_ms: f64, started_at: Timestamp) -> RequestMetricsSample {
        RequestMetricsSample {
            request_id: Uuid::now_v7(),
            route: "/api/v1/cover-letters".to_string(),
            method: "GET".to_string(),
            started_at,
            duration_ms,
            status_category: StatusCategory::from_status(status),
            status_code: status,
            cache_hit: None,
            db_query_time_ms: None,
            rejected_at: None,
            tier: None,
        }
    }

    fn recorder(config: MetricsConfig) -> ApiResult<(MetricsRecorder, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::at_epoch_2024());
        Ok((MetricsRecorder::new(config, clock.clone())?, clock))
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 50.0), 50.0);
        assert_eq!(percentile(&sorted, 95.0), 95.0);
        assert_eq!(percentile(&sorted, 99.0), 99.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_empty_dashboard() -> ApiResult<()> {
        let (recorder, _clock) = recorder(MetricsConfig::default())?;
        let dash = recorder.dashboard(Duration::from_secs(60));
        assert_eq!(dash.total_requests, 0);
        assert_eq!(dash.error_rate, 0.0);
        assert_eq!(dash.cache_hit_rate, None);
        assert_eq!(dash.rejections.len(), PipelineStage::ALL.len());
        Ok(())
    }

    #[test]
    fn test_capacity_bound() -> ApiResult<()> {
        let config = MetricsConfig {
            sample_capacity: 3,
            ..MetricsConfig::default()
        };
        let (recorder, clock) = recorder(config)?;
        for i in 0..5 {
            recorder.record(sample(200, f64::from(i), clock.now()));
        }
        assert_eq!(recorder.sample_count(), 3);
        let kept: Vec<f64> = recorder
            .samples_in(Duration::from_secs(60))
            .iter()
            .map(|s| s.duration_ms)
            .collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_retention_eviction() -> ApiResult<()> {
        let config = MetricsConfig {
            sample_retention: Duration::from_secs(60),
            ..MetricsConfig::default()
        };
        let (recorder, clock) = recorder(config)?;
        recorder.record(sample(200, 1.0, clock.now()));
        clock.advance(Duration::from_secs(61));
        recorder.record(sample(200, 2.0, clock.now()));

        assert_eq!(recorder.sample_count(), 1);
        assert_eq!(recorder.dashboard(Duration::from_secs(3600)).total_requests, 1);
        Ok(())
    }

    #[test]
    fn test_range_filter() -> ApiResult<()> {
        let (recorder, clock) = recorder(MetricsConfig::default())?;
        recorder.record(sample(200, 1.0, clock.now()));
        clock.advance(Duration::from_secs(120));
        recorder.record(sample(500, 1.0, clock.now()));

        let dash = recorder.dashboard(Duration::from_secs(60));
        assert_eq!(dash.total_requests, 1);
        assert_eq!(dash.server_errors, 1);
        assert_eq!(dash.error_rate, 1.0);
        Ok(())
    }

    #[test]
    fn test_error_split_and_cache_rate() -> ApiResult<()> {
        let (recorder, clock) = recorder(MetricsConfig::default())?;
        let now = clock.now();
        let mut hit = sample(200, 10.0, now);
        hit.cache_hit = Some(true);
        hit.db_query_time_ms = Some(4.0);
        let mut miss = sample(200, 30.0, now);
        miss.cache_hit = Some(false);
        miss.db_query_time_ms = Some(8.0);
        let mut limited = sample(429, 1.0, now);
        limited.rejected_at = Some(PipelineStage::RateLimit);

        recorder.record(hit);
        recorder.record(miss);
        recorder.record(limited);
        recorder.record(sample(500, 5.0, now));

        let dash = recorder.dashboard(Duration::from_secs(60));
        assert_eq!(dash.total_requests, 4);
        assert_eq!(dash.client_errors, 1);
        assert_eq!(dash.server_errors, 1);
        assert_eq!(dash.error_rate, 0.5);
        assert_eq!(dash.cache_hit_rate, Some(0.5));
        assert_eq!(dash.avg_db_time_ms, Some(6.0));
        assert_eq!(dash.rejections.get("rate_limit"), Some(&1));
        assert_eq!(dash.latency.max_ms, 30.0);
        Ok(())
    }

    #[test]
    fn test_activity_summary() -> ApiResult<()> {
        let (recorder, clock) = recorder(MetricsConfig::default())?;
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();
        for kind in [ActivityKind::CoverLetterGenerated, ActivityKind::CoverLetterSaved] {
            recorder.record_user_activity(UserActivityEvent::new(alice, kind, clock.now()));
        }
        recorder.record_user_activity(UserActivityEvent::new(
            bob,
            ActivityKind::Custom("template_exported".to_string()),
            clock.now(),
        ));

        let summary = recorder.activity_summary(Duration::from_secs(60));
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.unique_users, 2);
        assert_eq!(summary.by_kind.get("template_exported"), Some(&1));
        assert_eq!(summary.most_active_users[0].user_id, alice);
        assert_eq!(recorder.recent_activity(alice, 1)[0].kind, ActivityKind::CoverLetterSaved);
        Ok(())
    }

    #[test]
    fn test_counts_follow_status_category() {
        let now = ManualClock::at_epoch_2024().now();
        let mut success_with_500 = sample(500, 4.0, now);
        success_with_500.status_category = StatusCategory::Success;
        let mut server_error_with_200 = sample(200, 4.0, now);
        server_error_with_200.status_category = StatusCategory::ServerError;

        let dash = summarize(&[success_with_500], Duration::from_secs(60), now);
        assert_eq!(dash.successful_requests, 1);
        assert_eq!(dash.server_errors, 0);
        assert_eq!(dash.client_errors, 0);
        assert_eq!(dash.error_rate, 0.0);

        let dash = summarize(&[server_error_with_200], Duration::from_secs(60), now);
        assert_eq!(dash.server_errors, 1);
        assert_eq!(dash.client_errors, 0);
        assert_eq!(dash.error_rate, 1.0);
    }

    #[test]
    fn test_recent_activity_respects_retention() -> ApiResult<()> {
        let config = MetricsConfig {
            activity_retention: Duration::from_secs(60),
            ..MetricsConfig::default()
        };
        let (recorder, clock) = recorder(config)?;
        let user = Uuid::now_v7();
        recorder.record_user_activity(UserActivityEvent::new(
            user,
            ActivityKind::CoverLetterSaved,
            clock.now(),
        ));
        assert_eq!(recorder.recent_activity(user, 10).len(), 1);

        clock.advance(Duration::from_secs(61));
        assert!(recorder.recent_activity(user, 10).is_empty());
        assert_eq!(recorder.activity_count(), 1);
        Ok(())
    }

    #[test]
    fn test_poisoned_lock_recovers() -> ApiResult<()> {
        let (recorder, clock) = recorder(MetricsConfig::default())?;
        let recorder = Arc::new(recorder);
        let poisoner = Arc::clone(&recorder);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.samples.lock();
            panic!("poison the buffer");
        })
        .join();

        recorder.record(sample(200, 1.0, clock.now()));
        assert_eq!(recorder.sample_count(), 1);
        Ok(())
    }

    mod props {
        use super::*;
        use coverline_test_utils::generators::{arb_samples, arb_status_category};
        use proptest::prelude::*;

        /// Generated samples with an independently drawn category, so code and
        /// category may disagree.
        fn arb_relabelled_samples() -> impl Strategy<Value = Vec<RequestMetricsSample>> {
            arb_samples(ManualClock::at_epoch_2024().now(), 64).prop_flat_map(|samples| {
                let len = samples.len();
                (
                    Just(samples),
                    proptest::collection::vec(arb_status_category(), len),
                )
                    .prop_map(|(mut samples, categories)| {
                        for (sample, category) in samples.iter_mut().zip(categories) {
                            sample.status_category = category;
                        }
                        samples
                    })
            })
        }

        proptest! {
            #[test]
            fn prop_error_rate_is_non_success_over_total(
                samples in arb_samples(ManualClock::at_epoch_2024().now(), 64),
            ) {
                let dash = summarize(&samples, Duration::from_secs(60), samples[0].started_at);
                let total = samples.len() as u64;
                let non_success = samples.iter().filter(|s| !s.success()).count() as u64;
                prop_assert_eq!(dash.total_requests, total);
                prop_assert_eq!(dash.error_rate, non_success as f64 / total as f64);
            }

            #[test]
            fn prop_counts_partition_any_sequence(samples in arb_relabelled_samples()) {
                let dash = summarize(&samples, Duration::from_secs(60), samples[0].started_at);
                prop_assert_eq!(
                    dash.successful_requests + dash.client_errors + dash.server_errors,
                    dash.total_requests
                );
                let non_success = samples.iter().filter(|s| !s.success()).count() as u64;
                prop_assert_eq!(dash.error_rate, non_success as f64 / samples.len() as f64);
            }
        }
    }
}
