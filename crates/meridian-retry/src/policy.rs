//! Policy verdicts and the composed retry driver.

use std::time::Duration;

use meridian_transport::RequestContext;
use meridian_types::DataPlaneError;

use crate::budget::{DEFAULT_RETRY_WINDOW, STRONG_RETRY_WINDOW};
use crate::gone::GoneRetryPolicy;
use crate::retry_with::RetryWithPolicy;

/// Outcome of offering an error to one policy.
#[derive(Debug)]
pub enum PolicyVerdict {
    /// The policy claimed the error; retry after `delay`.
    Retry { delay: Duration },
    /// The policy claimed the error and decided the operation is over.
    Fail(DataPlaneError),
    /// Not this policy's to handle; the error passes through unchanged.
    NotClaimed(DataPlaneError),
}

/// Final decision for the operation loop.
#[derive(Debug)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Fail(DataPlaneError),
}

/// RetryWith first, Gone-class second. Each keeps its own backoff and
/// budget; whichever claims the error decides.
#[derive(Debug)]
pub struct ComposedRetryPolicy {
    retry_with: RetryWithPolicy,
    gone: GoneRetryPolicy,
}

impl ComposedRetryPolicy {
    /// `strong_account` widens the window: global-strong write barriers
    /// legitimately need more time.
    pub fn new(strong_account: bool) -> Self {
        let window = if strong_account {
            STRONG_RETRY_WINDOW
        } else {
            DEFAULT_RETRY_WINDOW
        };
        Self {
            retry_with: RetryWithPolicy::new(window),
            gone: GoneRetryPolicy::new(window),
        }
    }

    pub fn on_success(&mut self) {
        self.gone.on_success();
    }

    pub fn on_error(&mut self, err: DataPlaneError, ctx: &mut RequestContext) -> RetryDecision {
        let err = match self.retry_with.evaluate(err) {
            PolicyVerdict::Retry { delay } => return RetryDecision::Retry { delay },
            PolicyVerdict::Fail(err) => return RetryDecision::Fail(err),
            PolicyVerdict::NotClaimed(err) => err,
        };

        match self.gone.evaluate(err, ctx) {
            PolicyVerdict::Retry { delay } => RetryDecision::Retry { delay },
            PolicyVerdict::Fail(err) | PolicyVerdict::NotClaimed(err) => RetryDecision::Fail(err),
        }
    }
}
