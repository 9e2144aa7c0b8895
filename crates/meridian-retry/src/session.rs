//! The session-token-mismatch retry loop.
//!
//! Session reads chase replication: a replica that hasn't caught up to the
//! caller's session token yet usually will within milliseconds. This policy
//! is deliberately tighter than the Gone-class loop; it only ever handles
//! read-session-not-available and gives up quickly, at which point the
//! caller surfaces the dedicated failure (or fails over to another region).

use std::time::Duration;

use crate::budget::TimeBudget;

/// Window for chasing a session token on one replica set.
const SESSION_RETRY_WINDOW: Duration = Duration::from_secs(5);

/// First backoff between session retries.
const SESSION_BACKOFF_INITIAL: Duration = Duration::from_millis(5);

/// Backoff ceiling.
const SESSION_BACKOFF_CAP: Duration = Duration::from_millis(500);

/// Retry pacing for session-consistency reads.
#[derive(Debug)]
pub struct SessionTokenMismatchRetryPolicy {
    budget: TimeBudget,
    backoff: Duration,
}

impl SessionTokenMismatchRetryPolicy {
    pub fn new() -> Self {
        Self {
            budget: TimeBudget::new(SESSION_RETRY_WINDOW),
            backoff: SESSION_BACKOFF_INITIAL,
        }
    }

    /// `Some(delay)` to try again, `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(SESSION_BACKOFF_CAP);

        if self.budget.is_exhausted() || !self.budget.allows_delay(delay) {
            return None;
        }
        Some(delay)
    }
}

impl Default for SessionTokenMismatchRetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
