//! Per-endpoint health tracking.
//!
//! Health is a selection hint, never a hard filter: callers bias replica
//! ordering away from recently-failing addresses but may still pick an
//! unhealthy endpoint when nothing better remains.
//!
//! State per endpoint is a pair of atomics (status tag, transition time);
//! there is no cross-endpoint coordination. The effective status is a pure
//! function of the stored pair and the clock: `Unknown` and
//! `UnhealthyPending` promote to `Healthy` once a reset window elapses with
//! no further negative signal, without any explicit transition call.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use meridian_types::{Endpoint, ServerKey};

/// How long an endpoint stays suspect after its last negative signal.
pub const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(60);

/// Health of one physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HealthStatus {
    Unknown = 0,
    Healthy = 1,
    UnhealthyPending = 2,
    Unhealthy = 3,
}

impl HealthStatus {
    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::UnhealthyPending,
            3 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    /// Selection rank: lower sorts earlier. Unknown endpoints are usable,
    /// just not proven.
    pub fn rank(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::UnhealthyPending => 2,
            HealthStatus::Unhealthy => 3,
        }
    }
}

#[derive(Debug)]
struct EndpointHealth {
    status: AtomicU8,
    /// Milliseconds since the tracker's epoch at the last transition.
    since_ms: AtomicU64,
}

/// Tracks health for every endpoint the client has observed.
#[derive(Debug)]
pub struct HealthTracker {
    epoch: Instant,
    reset_window: Duration,
    entries: RwLock<HashMap<ServerKey, EndpointHealth>>,
}

impl HealthTracker {
    pub fn new(reset_window: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            reset_window,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Successful use: the endpoint is proven live.
    pub fn mark_healthy(&self, endpoint: &Endpoint) {
        self.mark_healthy_at(endpoint, Instant::now());
    }

    pub fn mark_healthy_at(&self, endpoint: &Endpoint, now: Instant) {
        self.transition(endpoint, HealthStatus::Healthy, now);
        tracing::trace!(endpoint = %endpoint, "endpoint healthy");
    }

    /// Connect failure or gone/timeout/5xx response.
    pub fn mark_unhealthy(&self, endpoint: &Endpoint) {
        self.mark_unhealthy_at(endpoint, Instant::now());
    }

    pub fn mark_unhealthy_at(&self, endpoint: &Endpoint, now: Instant) {
        self.transition(endpoint, HealthStatus::Unhealthy, now);
        tracing::debug!(endpoint = %endpoint, "endpoint unhealthy");
    }

    /// An address refresh re-observed this endpoint as still assigned.
    /// Unhealthy becomes UnhealthyPending (it gets another chance after the
    /// reset window); anything else is left alone.
    pub fn mark_refreshed(&self, endpoint: &Endpoint) {
        self.mark_refreshed_at(endpoint, Instant::now());
    }

    pub fn mark_refreshed_at(&self, endpoint: &Endpoint, now: Instant) {
        let key = endpoint.server_key();
        self.ensure_entry(&key, now);
        let entries = self.entries.read().unwrap();
        if let Some(entry) = entries.get(&key) {
            let unhealthy = HealthStatus::Unhealthy as u8;
            let pending = HealthStatus::UnhealthyPending as u8;
            if entry
                .status
                .compare_exchange(unhealthy, pending, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                entry.since_ms.store(self.ms_since_epoch(now), Ordering::Release);
            }
        }
    }

    pub fn effective_status(&self, endpoint: &Endpoint) -> HealthStatus {
        self.effective_status_at(endpoint, Instant::now())
    }

    /// Pure read: stored status adjusted for reset-window promotion. Never
    /// less healthy than the stored state.
    pub fn effective_status_at(&self, endpoint: &Endpoint, now: Instant) -> HealthStatus {
        let entries = self.entries.read().unwrap();
        let Some(entry) = entries.get(&endpoint.server_key()) else {
            return HealthStatus::Unknown;
        };

        let status = HealthStatus::from_tag(entry.status.load(Ordering::Acquire));
        match status {
            HealthStatus::Unknown | HealthStatus::UnhealthyPending => {
                let since = entry.since_ms.load(Ordering::Acquire);
                let elapsed = self.ms_since_epoch(now).saturating_sub(since);
                if elapsed >= self.reset_window.as_millis() as u64 {
                    HealthStatus::Healthy
                } else {
                    status
                }
            }
            other => other,
        }
    }

    fn transition(&self, endpoint: &Endpoint, status: HealthStatus, now: Instant) {
        let key = endpoint.server_key();
        self.ensure_entry(&key, now);
        let entries = self.entries.read().unwrap();
        if let Some(entry) = entries.get(&key) {
            entry.status.store(status as u8, Ordering::Release);
            entry.since_ms.store(self.ms_since_epoch(now), Ordering::Release);
        }
    }

    fn ensure_entry(&self, key: &ServerKey, now: Instant) {
        if self.entries.read().unwrap().contains_key(key) {
            return;
        }
        let mut entries = self.entries.write().unwrap();
        entries.entry(key.clone()).or_insert_with(|| EndpointHealth {
            status: AtomicU8::new(HealthStatus::Unknown as u8),
            since_ms: AtomicU64::new(self.ms_since_epoch(now)),
        });
    }

    fn ms_since_epoch(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RESET_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn endpoint(n: u16) -> Endpoint {
        Endpoint::parse(&format!("mrtp://node{n}:14331")).unwrap()
    }

    #[test]
    fn unseen_endpoint_is_unknown() {
        let tracker = HealthTracker::default();
        assert_eq!(tracker.effective_status(&endpoint(1)), HealthStatus::Unknown);
    }

    #[test]
    fn success_promotes_to_healthy() {
        let tracker = HealthTracker::default();
        tracker.mark_healthy(&endpoint(1));
        assert_eq!(tracker.effective_status(&endpoint(1)), HealthStatus::Healthy);
    }

    #[test]
    fn failure_then_refresh_becomes_pending() {
        let tracker = HealthTracker::default();
        let ep = endpoint(1);
        tracker.mark_unhealthy(&ep);
        assert_eq!(tracker.effective_status(&ep), HealthStatus::Unhealthy);

        tracker.mark_refreshed(&ep);
        assert_eq!(tracker.effective_status(&ep), HealthStatus::UnhealthyPending);
    }

    #[test]
    fn refresh_leaves_healthy_alone() {
        let tracker = HealthTracker::default();
        let ep = endpoint(1);
        tracker.mark_healthy(&ep);
        tracker.mark_refreshed(&ep);
        assert_eq!(tracker.effective_status(&ep), HealthStatus::Healthy);
    }

    #[test]
    fn pending_promotes_after_reset_window() {
        let tracker = HealthTracker::new(Duration::from_secs(60));
        let ep = endpoint(1);
        let now = Instant::now();
        tracker.mark_unhealthy_at(&ep, now);
        tracker.mark_refreshed_at(&ep, now);

        let before = now + Duration::from_secs(59);
        assert_eq!(tracker.effective_status_at(&ep, before), HealthStatus::UnhealthyPending);

        let after = now + Duration::from_secs(61);
        assert_eq!(tracker.effective_status_at(&ep, after), HealthStatus::Healthy);
    }

    #[test]
    fn unhealthy_does_not_self_heal_without_refresh() {
        let tracker = HealthTracker::new(Duration::from_secs(60));
        let ep = endpoint(1);
        let now = Instant::now();
        tracker.mark_unhealthy_at(&ep, now);

        // Without a refresh re-observing the endpoint, it stays unhealthy.
        let much_later = now + Duration::from_secs(600);
        assert_eq!(tracker.effective_status_at(&ep, much_later), HealthStatus::Unhealthy);
    }

    #[test]
    fn rank_orders_for_selection() {
        assert!(HealthStatus::Healthy.rank() < HealthStatus::Unknown.rank());
        assert!(HealthStatus::Unknown.rank() < HealthStatus::UnhealthyPending.rank());
        assert!(HealthStatus::UnhealthyPending.rank() < HealthStatus::Unhealthy.rank());
    }

    #[derive(Debug, Clone)]
    enum Op {
        MarkHealthy,
        MarkUnhealthy,
        MarkRefreshed,
        Advance(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::MarkHealthy),
            Just(Op::MarkUnhealthy),
            Just(Op::MarkRefreshed),
            (0u64..120_000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        /// Once marked healthy, the endpoint stays effectively healthy for
        /// any sequence of positive signals and time advances; only an
        /// explicit negative signal can demote it.
        #[test]
        fn prop_health_never_regresses_without_negative_signal(
            ops in proptest::collection::vec(op_strategy(), 0..40),
        ) {
            let tracker = HealthTracker::new(Duration::from_secs(60));
            let ep = endpoint(1);
            let mut now = Instant::now();
            let mut healthy_since_last_negative = false;

            for op in ops {
                match op {
                    Op::MarkHealthy => {
                        tracker.mark_healthy_at(&ep, now);
                        healthy_since_last_negative = true;
                    }
                    Op::MarkUnhealthy => {
                        tracker.mark_unhealthy_at(&ep, now);
                        healthy_since_last_negative = false;
                    }
                    Op::MarkRefreshed => {
                        tracker.mark_refreshed_at(&ep, now);
                    }
                    Op::Advance(ms) => {
                        now += Duration::from_millis(ms);
                    }
                }

                if healthy_since_last_negative {
                    prop_assert_eq!(
                        tracker.effective_status_at(&ep, now),
                        HealthStatus::Healthy
                    );
                }
            }
        }
    }
}
