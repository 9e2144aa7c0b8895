//! Wire status and sub-status codes.
//!
//! The backend folds several distinct topology-transient conditions into the
//! generic `410 Gone` status; the sub-status header disambiguates them. The
//! retry layer switches exhaustively on the derived [`FailureKind`](crate::FailureKind)
//! rather than on raw codes.

use serde::{Deserialize, Serialize};

/// HTTP-shaped status codes used by both transports.
pub mod codes {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const CONFLICT: u16 = 409;
    pub const GONE: u16 = 410;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const RETRY_WITH: u16 = 449;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    pub fn is_success(status: u16) -> bool {
        (200..300).contains(&status)
    }
}

/// Sub-status codes carried in the `x-meridian-substatus` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u32)]
pub enum SubStatus {
    #[default]
    None = 0,
    /// The collection named by the request was deleted and recreated; the
    /// client's name→rid mapping is stale. (on 410)
    NameCacheIsStale = 1000,
    /// The partition key range no longer exists (merged away or split). (on 410)
    PartitionKeyRangeGone = 1002,
    /// The range is mid-split; retry after a partition-key-range refresh. (on 410)
    CompletingSplit = 1007,
    /// The range is migrating between nodes; retry after a routing-map
    /// refresh. (on 410)
    CompletingPartitionMigration = 1008,
    /// No contacted replica could satisfy the request's session token. (on 404)
    ReadSessionNotAvailable = 1021,
    /// The global-strong write barrier was not met within its attempt
    /// budget. (on 410)
    GlobalStrongWriteBarrierNotMet = 1030,
    /// Synthesized from a transport-level failure (connect error, broken
    /// stream); no response was received from the replica. (on 410)
    TransportGenerated = 1031,
}

impl SubStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            1000 => SubStatus::NameCacheIsStale,
            1002 => SubStatus::PartitionKeyRangeGone,
            1007 => SubStatus::CompletingSplit,
            1008 => SubStatus::CompletingPartitionMigration,
            1021 => SubStatus::ReadSessionNotAvailable,
            1030 => SubStatus::GlobalStrongWriteBarrierNotMet,
            1031 => SubStatus::TransportGenerated,
            _ => SubStatus::None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}
