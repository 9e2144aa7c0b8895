//! Upstream metadata interfaces the routing layer consumes.
//!
//! All three providers talk to the metadata service (or a test double) and
//! may retry/refresh internally. Topology-transient failures surface as
//! classified store failures; the caches translate the gone-class ones into
//! "empty, refresh and retry".

use std::future::Future;

use meridian_types::{
    CollectionRid, Endpoint, PartitionKeyDefinition, PartitionKeyRange, PartitionRangeIdentity,
    RegionName, Result,
};

/// What the collection metadata cache resolves a name to.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMetadata {
    pub rid: CollectionRid,
    pub partition_key: PartitionKeyDefinition,
}

/// Resolves a collection link to its metadata.
pub trait CollectionProvider: Send + Sync + 'static {
    fn collection(
        &self,
        link: &str,
    ) -> impl Future<Output = Result<CollectionMetadata>> + Send;
}

/// Fetches the full partition-key-range list for a collection.
///
/// Routing maps refresh wholesale, never per-range.
pub trait RoutingMapProvider: Send + Sync + 'static {
    fn ranges(
        &self,
        collection_rid: &CollectionRid,
    ) -> impl Future<Output = Result<Vec<PartitionKeyRange>>> + Send;
}

/// Fetches the physical replica addresses for one partition range.
pub trait AddressProvider: Send + Sync + 'static {
    fn addresses(
        &self,
        identity: &PartitionRangeIdentity,
        region: Option<&RegionName>,
    ) -> impl Future<Output = Result<Vec<Endpoint>>> + Send;
}
