//! Sliding-window admission control.
//!
//! Each client key owns a queue of the instants at which its requests were
//! admitted within the trailing window. Windows live in a sharded
//! [`DashMap`]; `admit` and `purge_idle` both work under the owning shard's
//! lock, so an idle-window eviction can never interleave with an admission
//! for the same key. Callers may race, so an admission can arrive with an
//! instant older than one already recorded; the queue stays sorted anyway.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pipeline::{ClientKey, RateLimitRejection};
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::maintenance::MaintenanceHandle;

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed.
    Admitted {
        /// Further requests the key may make in the current window.
        remaining: u32,
        limit: u32,
    },
    /// The key is over its limit.
    Rejected {
        /// Time until the oldest admitted request leaves the window.
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug)]
struct AdmissionWindow {
    admitted: VecDeque<Instant>,
    last_seen: Instant,
}

impl AdmissionWindow {
    fn new(now: Instant) -> Self {
        Self {
            admitted: VecDeque::new(),
            last_seen: now,
        }
    }

    /// Drops admissions that have left the trailing window.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-client sliding-window rate limiter.
#[derive(Debug)]
pub struct AdmissionController {
    windows: DashMap<ClientKey, AdmissionWindow>,
    limit: u32,
    window: Duration,
}

impl AdmissionController {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            limit: config.limit,
            window: config.window,
        }
    }

    /// Records and admits a request from `key` at `now`, or rejects it if
    /// `limit` requests were already admitted within the trailing window.
    pub fn admit(&self, key: &ClientKey, now: Instant) -> Admission {
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| AdmissionWindow::new(now));
        let window = entry.value_mut();
        window.last_seen = window.last_seen.max(now);
        window.prune(now, self.window);

        let in_window = u32::try_from(window.admitted.len()).unwrap_or(u32::MAX);
        if in_window < self.limit {
            let at = window.admitted.partition_point(|t| *t <= now);
            window.admitted.insert(at, now);
            let remaining = self.limit - in_window - 1;
            debug!(client_key = %key, remaining, "Request admitted");
            return Admission::Admitted {
                remaining,
                limit: self.limit,
            };
        }

        let retry_after = window
            .admitted
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(self.window);
        debug!(
            client_key = %key,
            retry_after_ms = retry_after.as_millis() as u64,
            "Request rejected by rate limit"
        );
        Admission::Rejected { retry_after }
    }

    /// Builds the caller-facing rejection for a `retry_after`.
    pub fn rejection(&self, retry_after: Duration) -> RateLimitRejection {
        RateLimitRejection::new(retry_after, self.limit, self.window)
    }

    /// Evicts windows of keys idle for at least twice the window length.
    /// Returns the number evicted.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let idle_after = self.window.saturating_mul(2);
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.last_seen) < idle_after);
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!(evicted, "Purged idle admission windows");
        }
        evicted
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Starts a periodic idle-window sweep.
    pub fn spawn_maintenance(self: &Arc<Self>, period: Duration) -> MaintenanceHandle {
        let controller = Arc::clone(self);
        MaintenanceHandle::spawn("admission", period, move || {
            controller.purge_idle(Instant::now());
        })
    }
}
