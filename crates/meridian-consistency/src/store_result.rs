//! Normalized per-replica outcomes.

use meridian_transport::StoreResponse;
use meridian_types::{Endpoint, ResponseHeaders, SessionToken, StoreFailure};

/// What one replica said, success or failure, with the headers either way.
///
/// Immutable once constructed; the fan-out engine collects these and the
/// consistency engine reconciles them.
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub endpoint: Endpoint,
    pub outcome: StoreOutcome,
}

#[derive(Debug, Clone)]
pub enum StoreOutcome {
    Success(StoreResponse),
    Failure(StoreFailure),
}

impl StoreResult {
    pub fn success(endpoint: Endpoint, response: StoreResponse) -> Self {
        Self {
            endpoint,
            outcome: StoreOutcome::Success(response),
        }
    }

    pub fn failure(endpoint: Endpoint, failure: StoreFailure) -> Self {
        Self {
            endpoint,
            outcome: StoreOutcome::Failure(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StoreOutcome::Success(_))
    }

    pub fn headers(&self) -> &ResponseHeaders {
        match &self.outcome {
            StoreOutcome::Success(response) => &response.headers,
            StoreOutcome::Failure(failure) => &failure.headers,
        }
    }

    pub fn lsn(&self) -> i64 {
        self.headers().lsn
    }

    pub fn global_committed_lsn(&self) -> i64 {
        self.headers().global_committed_lsn
    }

    pub fn session_token(&self) -> Option<SessionToken> {
        self.headers().session_token
    }

    pub fn is_gone(&self) -> bool {
        matches!(&self.outcome, StoreOutcome::Failure(f) if f.is_gone())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(&self.outcome, StoreOutcome::Failure(f) if f.is_not_found())
    }

    pub fn is_invalid_partition(&self) -> bool {
        matches!(&self.outcome, StoreOutcome::Failure(f) if f.is_invalid_partition())
    }

    pub fn is_throughput_too_large(&self) -> bool {
        matches!(&self.outcome, StoreOutcome::Failure(f) if f.is_throughput_too_large())
    }
}
