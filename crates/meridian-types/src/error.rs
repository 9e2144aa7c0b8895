//! The closed operational error type.
//!
//! Every failure the data plane can observe is one of a small set of
//! variants carrying structured classification fields. The retry layer
//! switches exhaustively on [`FailureKind`]; nothing downcasts.

use crate::headers::ResponseHeaders;
use crate::identity::PartitionRangeIdentity;
use crate::status::{SubStatus, codes};

/// A protocol-level error response from a replica or the metadata service.
///
/// Immutable once constructed; cloned freely into per-replica results and
/// "last seen" retry state.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreFailure {
    pub status: u16,
    pub sub_status: SubStatus,
    pub headers: ResponseHeaders,
    pub message: String,
    /// The partition involved, when known at classification time.
    pub identity: Option<PartitionRangeIdentity>,
}

impl StoreFailure {
    pub fn new(status: u16, sub_status: SubStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            sub_status,
            headers: ResponseHeaders::default(),
            message: message.into(),
            identity: None,
        }
    }

    pub fn with_headers(mut self, headers: ResponseHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_identity(mut self, identity: PartitionRangeIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Collapses (status, sub-status) into the closed classification the
    /// retry policies switch on.
    pub fn kind(&self) -> FailureKind {
        match (self.status, self.sub_status) {
            (codes::GONE, SubStatus::NameCacheIsStale) => FailureKind::InvalidPartition,
            (codes::GONE, SubStatus::PartitionKeyRangeGone) => FailureKind::PartitionKeyRangeGone,
            (codes::GONE, SubStatus::CompletingSplit) => FailureKind::PartitionKeyRangeIsSplitting,
            (codes::GONE, SubStatus::CompletingPartitionMigration) => {
                FailureKind::PartitionIsMigrating
            }
            (codes::GONE, _) => FailureKind::Gone,
            (codes::RETRY_WITH, _) => FailureKind::RetryWith,
            (codes::NOT_FOUND, SubStatus::ReadSessionNotAvailable) => {
                FailureKind::ReadSessionNotAvailable
            }
            (codes::NOT_FOUND, _) => FailureKind::NotFound,
            (codes::BAD_REQUEST, _) => FailureKind::BadRequest,
            (codes::REQUEST_TIMEOUT, _) => FailureKind::RequestTimeout,
            (codes::TOO_MANY_REQUESTS, _) => FailureKind::ThroughputTooLarge,
            (codes::SERVICE_UNAVAILABLE, _) => FailureKind::ServiceUnavailable,
            (status, _) => FailureKind::Other(status),
        }
    }

    pub fn is_gone(&self) -> bool {
        self.status == codes::GONE
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == FailureKind::NotFound
    }

    pub fn is_invalid_partition(&self) -> bool {
        self.kind() == FailureKind::InvalidPartition
    }

    pub fn is_throughput_too_large(&self) -> bool {
        self.kind() == FailureKind::ThroughputTooLarge
    }
}

impl std::fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status {} substatus {:?}", self.status, self.sub_status)?;
        if let Some(identity) = &self.identity {
            write!(f, " partition {identity}")?;
        }
        if self.headers.lsn >= 0 {
            write!(f, " lsn {}", self.headers.lsn)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Closed classification of a [`StoreFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Generic 410: replica no longer owns the partition, or the transport
    /// could not reach it.
    Gone,
    /// Name→rid mapping is stale (collection recreated).
    InvalidPartition,
    /// The range id no longer exists.
    PartitionKeyRangeGone,
    /// Split in progress.
    PartitionKeyRangeIsSplitting,
    /// Migration in progress.
    PartitionIsMigrating,
    /// Backend concurrency conflict; retry with backoff.
    RetryWith,
    /// No replica satisfied the request's session token.
    ReadSessionNotAvailable,
    NotFound,
    BadRequest,
    RequestTimeout,
    ThroughputTooLarge,
    ServiceUnavailable,
    Other(u16),
}

/// The operational error surfaced by every layer of the data plane.
#[derive(Debug, thiserror::Error)]
pub enum DataPlaneError {
    /// Protocol-level error response.
    #[error("store failure: {0}")]
    Store(StoreFailure),

    /// Transport-level failure: the request may or may not have reached the
    /// wire. `request_sent` decides write retryability.
    #[error("network failure talking to {endpoint}: {message}")]
    Network {
        endpoint: String,
        request_sent: bool,
        message: String,
    },

    /// A retry chain resolved to a partition unrelated to its prior
    /// resolution. Routing never jumps partitions except to a child of a
    /// split; anything else voids the cached resolution.
    #[error("request target changed from partition {previous} to unrelated {current}")]
    InvalidTarget {
        previous: PartitionRangeIdentity,
        current: PartitionRangeIdentity,
    },

    /// Client-side misuse, never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A retry budget was exhausted; wraps the last concrete cause so
    /// operators can tell a slow replica from a split in progress.
    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        #[source]
        source: Option<Box<DataPlaneError>>,
    },
}

impl DataPlaneError {
    /// Classification used by the retry policies. Network failures count as
    /// Gone (the replica is unreachable; only write safety differs).
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            DataPlaneError::Store(failure) => failure.kind(),
            DataPlaneError::Network { .. } => FailureKind::Gone,
            DataPlaneError::InvalidTarget { .. } => FailureKind::Gone,
            DataPlaneError::BadRequest(_) => FailureKind::BadRequest,
            DataPlaneError::ServiceUnavailable { .. } => FailureKind::ServiceUnavailable,
        }
    }

    /// Whether a write that produced this error may have reached the wire.
    pub fn request_possibly_sent(&self) -> bool {
        match self {
            DataPlaneError::Network { request_sent, .. } => *request_sent,
            // A protocol-level response proves the request arrived.
            DataPlaneError::Store(_) => true,
            _ => false,
        }
    }

    pub fn service_unavailable(message: impl Into<String>, source: Option<DataPlaneError>) -> Self {
        DataPlaneError::ServiceUnavailable {
            message: message.into(),
            source: source.map(Box::new),
        }
    }

    /// The headers last observed on the failure path, for diagnostics.
    pub fn headers(&self) -> Option<&ResponseHeaders> {
        match self {
            DataPlaneError::Store(failure) => Some(&failure.headers),
            DataPlaneError::ServiceUnavailable {
                source: Some(inner),
                ..
            } => inner.headers(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataPlaneError>;
