//! Consistency model enums.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Consistency level requested for an operation, or configured as the
/// account default.
///
/// Ordered strongest to weakest; a per-request override may only weaken the
/// account default, never strengthen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    Session,
    ConsistentPrefix,
    Eventual,
}

impl ConsistencyLevel {
    /// Whether reads at this level go through quorum reconciliation.
    pub fn requires_quorum(self) -> bool {
        matches!(self, ConsistencyLevel::Strong | ConsistencyLevel::BoundedStaleness)
    }
}

impl Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConsistencyLevel::Strong => "strong",
            ConsistencyLevel::BoundedStaleness => "bounded-staleness",
            ConsistencyLevel::Session => "session",
            ConsistencyLevel::ConsistentPrefix => "consistent-prefix",
            ConsistencyLevel::Eventual => "eventual",
        };
        write!(f, "{s}")
    }
}

/// How the consistency reader targets replicas for one read.
///
/// Derived from the effective [`ConsistencyLevel`] plus whether the caller
/// pinned a specific replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadMode {
    /// Single request to the primary replica; bypasses consistency logic.
    Primary,
    /// Quorum read with LSN convergence.
    Strong,
    /// Same quorum path as [`ReadMode::Strong`].
    BoundedStaleness,
    /// One replica, any replica. Session enforcement layers on top.
    Any,
}

/// Kind of operation being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Read,
    Write,
    Head,
}

impl OperationType {
    pub fn is_write(self) -> bool {
        matches!(self, OperationType::Write)
    }

    /// Reads and barriers are always safe to reissue. Writes are only safe
    /// to reissue before the request is confirmed sent.
    pub fn is_idempotent(self) -> bool {
        !self.is_write()
    }
}

impl Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationType::Read => "read",
            OperationType::Write => "write",
            OperationType::Head => "head",
        };
        write!(f, "{s}")
    }
}

/// Resource class the request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceClass {
    /// Metadata/master resources; resolved via the dedicated master path.
    Master,
    /// Partitioned document resources.
    Document,
}

impl ResourceClass {
    pub fn is_master(self) -> bool {
        matches!(self, ResourceClass::Master)
    }
}
