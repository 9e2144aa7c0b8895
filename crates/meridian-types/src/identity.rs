//! Routing identities.
//!
//! A logical partition is addressed by its [`PartitionRangeIdentity`]: the
//! owning collection's resource id plus the partition range id within that
//! collection. A sentinel identity addresses the metadata/master partition,
//! which is cached and resolved separately from data partitions.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Resource id of a collection.
///
/// Opaque, assigned by the backend when the collection is created. Stable
/// across splits and migrations; only dropped when the collection itself is
/// deleted and recreated under the same name (the "name cache stale" case).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct CollectionRid(String);

impl CollectionRid {
    pub fn new(rid: impl Into<String>) -> Self {
        Self(rid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CollectionRid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CollectionRid {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Id of a partition key range within a collection.
///
/// Assigned sequentially by the backend; children of a split get fresh ids
/// and record the parent chain in [`super::PartitionKeyRange::parents`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct PartitionRangeId(String);

impl PartitionRangeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PartitionRangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartitionRangeId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Immutable cache key for a physical partition: (collection, range).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionRangeIdentity {
    pub collection_rid: CollectionRid,
    pub range_id: PartitionRangeId,
}

impl PartitionRangeIdentity {
    pub fn new(collection_rid: CollectionRid, range_id: PartitionRangeId) -> Self {
        Self {
            collection_rid,
            range_id,
        }
    }

    /// Sentinel identity for the metadata/master partition.
    ///
    /// Master addresses are kept in a dedicated cache slot, not the
    /// per-partition map, so the sentinel never collides with a data
    /// partition.
    pub fn master() -> Self {
        Self {
            collection_rid: CollectionRid::new(""),
            range_id: PartitionRangeId::new("M"),
        }
    }

    pub fn is_master(&self) -> bool {
        self.collection_rid.as_str().is_empty() && self.range_id.as_str() == "M"
    }
}

impl Display for PartitionRangeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection_rid, self.range_id)
    }
}

/// Name of a service region (e.g. `"West US"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionName(String);

impl RegionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RegionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RegionName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_sentinel_is_distinct() {
        let master = PartitionRangeIdentity::master();
        assert!(master.is_master());

        let data = PartitionRangeIdentity::new(CollectionRid::new("coll1"), PartitionRangeId::new("0"));
        assert!(!data.is_master());
        assert_ne!(master, data);
    }

    #[test]
    fn identity_hashes_by_value() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PartitionRangeIdentity::new("c".into(), "0".into()));
        assert!(set.contains(&PartitionRangeIdentity::new("c".into(), "0".into())));
        assert!(!set.contains(&PartitionRangeIdentity::new("c".into(), "1".into())));
    }
}
