//! Wall-clock retry budgets.

use std::time::Duration;

use tokio::time::Instant;

/// Default retry window for one logical operation.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(30);

/// Retry window for accounts with STRONG default consistency, whose write
/// barriers legitimately take longer.
pub const STRONG_RETRY_WINDOW: Duration = Duration::from_secs(60);

/// Wall-clock start + window. Checked at the start of every suspension
/// point; in-flight work is never actively cancelled, its result is just
/// discarded once the budget is gone.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    start: Instant,
    window: Duration,
}

impl TimeBudget {
    pub fn new(window: Duration) -> Self {
        Self {
            start: Instant::now(),
            window,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.window.saturating_sub(self.elapsed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// Whether a retry delayed by `delay` would still land inside the
    /// window.
    pub fn allows_delay(&self, delay: Duration) -> bool {
        self.remaining() > delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn budget_expires_with_the_clock() {
        let budget = TimeBudget::new(Duration::from_secs(30));
        assert!(!budget.is_exhausted());
        assert!(budget.allows_delay(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!budget.is_exhausted());
        assert!(!budget.allows_delay(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(budget.is_exhausted());
    }
}
