//! The RetryWith policy.
//!
//! The backend signals a concurrency conflict with a dedicated status; the
//! fix is simply to try again shortly. This loop is independent of the
//! Gone-class machinery: its own (much shorter) backoff, its own budget,
//! and it remembers the most recent conflict so exhaustion can surface the
//! concrete cause instead of a generic service-unavailable.

use std::time::Duration;

use meridian_types::{DataPlaneError, FailureKind, StoreFailure};

use crate::budget::TimeBudget;
use crate::policy::PolicyVerdict;

/// First backoff between RetryWith retries.
const RETRY_WITH_BACKOFF_INITIAL: Duration = Duration::from_millis(10);

/// Backoff ceiling.
const RETRY_WITH_BACKOFF_CAP: Duration = Duration::from_secs(15);

/// Retry driver for backend concurrency conflicts.
#[derive(Debug)]
pub struct RetryWithPolicy {
    budget: TimeBudget,
    backoff: Duration,
    last_conflict: Option<StoreFailure>,
}

impl RetryWithPolicy {
    pub fn new(window: Duration) -> Self {
        Self {
            budget: TimeBudget::new(window),
            backoff: RETRY_WITH_BACKOFF_INITIAL,
            last_conflict: None,
        }
    }

    pub fn evaluate(&mut self, err: DataPlaneError) -> PolicyVerdict {
        if err.failure_kind() != FailureKind::RetryWith {
            return PolicyVerdict::NotClaimed(err);
        }

        if let DataPlaneError::Store(failure) = &err {
            self.last_conflict = Some(failure.clone());
        }

        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(RETRY_WITH_BACKOFF_CAP);

        if self.budget.is_exhausted() || !self.budget.allows_delay(delay) {
            // Surface the concrete conflict, not a generic wrapper payload.
            let cause = self
                .last_conflict
                .take()
                .map(DataPlaneError::Store)
                .unwrap_or(err);
            return PolicyVerdict::Fail(DataPlaneError::service_unavailable(
                "retry-with budget exhausted",
                Some(cause),
            ));
        }

        tracing::debug!(delay_ms = delay.as_millis() as u64, "retrying after concurrency conflict");
        PolicyVerdict::Retry { delay }
    }
}
