//! Tiered fixed-window rate limiter.
//!
//! One window per `(identity, route class)`. The quota comes from the
//! [`RateLimitPolicy`] cell for the caller's tier and the route class. Windows
//! roll over lazily on the first check at or after `window_start + window`,
//! so a burst of up to twice the limit is possible across a window edge.

use crate::config::RateLimitPolicy;
use coverline_core::clock::deadline_after;
use coverline_core::{Clock, RouteClass, Timestamp, UserTier};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Outcome of one [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Timestamp,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now: Timestamp) -> u64 {
        let ms = self.reset_at.signed_duration_since(now).num_milliseconds().max(0) as u64;
        ms.div_ceil(1000).max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: Timestamp,
    length: Duration,
    count: u32,
}

impl Window {
    fn reset_at(&self) -> Timestamp {
        deadline_after(self.start, self.length)
    }
}

/// Per-identity fixed-window counters.
///
/// Increment-and-compare runs under the DashMap entry lock, so contention is
/// confined to one shard.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<(String, RouteClass), Window>,
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request for `identity` and decide whether it may proceed.
    pub fn check(&self, identity: &str, tier: UserTier, class: RouteClass) -> RateLimitDecision {
        let quota = self.policy.quota(tier, class);
        let now = self.clock.now();

        let mut window = self
            .windows
            .entry((identity.to_string(), class))
            .or_insert(Window {
                start: now,
                length: quota.window(),
                count: 0,
            });

        if now >= window.reset_at() {
            window.start = now;
            window.length = quota.window();
            window.count = 0;
        }

        let limit = quota.limit();
        let allowed = window.count < limit;
        if allowed {
            window.count += 1;
        }

        RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(window.count),
            reset_at: window.reset_at(),
        }
    }

    /// Drop windows that have already expired. Returns how many were removed.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| now < window.reset_at());
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "Swept idle rate-limit windows");
        }
        removed
    }

    /// Live windows, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` on the Tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.sweep_idle();
            }
        })
    }
}
