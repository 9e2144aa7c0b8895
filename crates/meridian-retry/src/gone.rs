//! The Gone-class retry policy.
//!
//! Classifies topology-transient failures, performs the cache-invalidation
//! action each kind calls for, and retries under exponential backoff inside
//! a wall-clock budget. The single most important rule lives here: a write
//! whose bytes may already have reached the wire is never retried.

use std::time::Duration;

use meridian_transport::RequestContext;
use meridian_types::{DataPlaneError, FailureKind};

use crate::budget::TimeBudget;
use crate::policy::PolicyVerdict;

/// First backoff between Gone-class retries.
const GONE_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Backoff ceiling.
const GONE_BACKOFF_CAP: Duration = Duration::from_secs(15);

/// Retry driver for the Gone-class failure set.
#[derive(Debug)]
pub struct GoneRetryPolicy {
    budget: TimeBudget,
    backoff: Duration,
    invalid_partition_strikes: u32,
}

impl GoneRetryPolicy {
    pub fn new(window: Duration) -> Self {
        Self {
            budget: TimeBudget::new(window),
            backoff: GONE_BACKOFF_INITIAL,
            invalid_partition_strikes: 0,
        }
    }

    /// A successful attempt resets the stale-name strike counter; only
    /// *consecutive* InvalidPartition signals are terminal.
    pub fn on_success(&mut self) {
        self.invalid_partition_strikes = 0;
    }

    pub fn evaluate(&mut self, err: DataPlaneError, ctx: &mut RequestContext) -> PolicyVerdict {
        // Non-idempotency safety: reads are always safe to reissue, writes
        // only before the request is confirmed sent. A network failure
        // after send leaves the outcome unknown; retrying risks a silent
        // duplicate write.
        if ctx.request.operation.is_write() {
            if let DataPlaneError::Network {
                request_sent: true, ..
            } = &err
            {
                tracing::warn!(
                    attempt = ctx.attempt,
                    "write may have reached the wire; not retrying"
                );
                return PolicyVerdict::Fail(DataPlaneError::service_unavailable(
                    "write outcome unknown after transport failure",
                    Some(err),
                ));
            }
        }

        let kind = err.failure_kind();
        let escalates_backoff = match kind {
            FailureKind::Gone => {
                // The address cache self-corrects on the next resolution.
                ctx.force_address_refresh = true;
                true
            }
            FailureKind::PartitionIsMigrating => {
                ctx.force_routing_map_refresh = true;
                true
            }
            FailureKind::PartitionKeyRangeIsSplitting => {
                // The selected quorum belongs to the pre-split replica set;
                // both go.
                ctx.clear_resolution();
                ctx.force_routing_map_refresh = true;
                false
            }
            FailureKind::InvalidPartition => {
                if ctx.collection_rid.is_none() {
                    // Without collection context there is no name cache to
                    // refresh; surface as-is.
                    return PolicyVerdict::NotClaimed(err);
                }
                self.invalid_partition_strikes += 1;
                if self.invalid_partition_strikes >= 2 {
                    // A second consecutive stale-name signal is a persistent
                    // problem, not transient staleness.
                    tracing::warn!("second consecutive invalid-partition; failing permanently");
                    return PolicyVerdict::Fail(err);
                }
                ctx.clear_resolution();
                ctx.force_name_cache_refresh = true;
                true
            }
            FailureKind::RetryWith => true,
            _ => return PolicyVerdict::NotClaimed(err),
        };

        let delay = if escalates_backoff {
            let delay = self.backoff;
            self.backoff = (self.backoff * 2).min(GONE_BACKOFF_CAP);
            delay
        } else {
            Duration::ZERO
        };

        if self.budget.is_exhausted() || !self.budget.allows_delay(delay) {
            tracing::debug!(
                elapsed_ms = self.budget.elapsed().as_millis() as u64,
                ?kind,
                "gone-class retry budget exhausted"
            );
            return PolicyVerdict::Fail(DataPlaneError::service_unavailable(
                "retry budget exhausted",
                Some(err),
            ));
        }

        tracing::debug!(
            ?kind,
            delay_ms = delay.as_millis() as u64,
            attempt = ctx.attempt,
            "retrying after topology-transient failure"
        );
        PolicyVerdict::Retry { delay }
    }
}
