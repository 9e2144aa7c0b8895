//! Per-collection routing maps: ordered partition-key-range boundaries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use meridian_types::{
    CollectionRid, DataPlaneError, EffectivePartitionKey, FailureKind, PartitionKeyRange,
    PartitionRangeId, Result,
};

use crate::providers::RoutingMapProvider;
use crate::single_flight::FlightGates;

/// The ordered range boundaries of one collection, as of one fetch.
///
/// Immutable; the owning cache replaces whole maps, never patches them.
#[derive(Debug)]
pub struct CollectionRoutingMap {
    pub collection_rid: CollectionRid,
    /// Sorted ascending by `min_inclusive`; adjacent and non-overlapping.
    ranges: Vec<Arc<PartitionKeyRange>>,
    by_id: HashMap<PartitionRangeId, Arc<PartitionKeyRange>>,
    pub fetched_at: Instant,
}

impl CollectionRoutingMap {
    /// Builds a map from an unordered range list, validating that the
    /// ranges tile the key space without overlap.
    pub fn new(
        collection_rid: CollectionRid,
        mut ranges: Vec<PartitionKeyRange>,
        fetched_at: Instant,
    ) -> Result<Self> {
        ranges.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
        for pair in ranges.windows(2) {
            if pair[1].min_inclusive < pair[0].max_exclusive {
                return Err(DataPlaneError::BadRequest(format!(
                    "overlapping ranges {} and {} in routing map for {collection_rid}",
                    pair[0].id, pair[1].id
                )));
            }
        }

        let ranges: Vec<Arc<PartitionKeyRange>> = ranges.into_iter().map(Arc::new).collect();
        let by_id = ranges
            .iter()
            .map(|r| (r.id.clone(), Arc::clone(r)))
            .collect();

        Ok(Self {
            collection_rid,
            ranges,
            by_id,
            fetched_at,
        })
    }

    /// Point lookup by effective partition key.
    pub fn range_for_key(&self, key: &EffectivePartitionKey) -> Option<Arc<PartitionKeyRange>> {
        let idx = self
            .ranges
            .partition_point(|r| r.min_inclusive <= *key)
            .checked_sub(1)?;
        let range = &self.ranges[idx];
        range.contains(key).then(|| Arc::clone(range))
    }

    pub fn range_by_id(&self, id: &PartitionRangeId) -> Option<Arc<PartitionKeyRange>> {
        self.by_id.get(id).cloned()
    }

    /// Whether this map positively records `id` as replaced: not present,
    /// but named as a parent by a current range. A `true` here is only
    /// trusted to finalize a Gone when the map is known fresh; otherwise
    /// the caller refreshes and retries.
    pub fn is_range_gone(&self, id: &PartitionRangeId) -> bool {
        !self.by_id.contains_key(id) && self.ranges.iter().any(|r| r.has_parent(id))
    }

    /// The single range, if the collection has exactly one.
    pub fn single_range(&self) -> Option<Arc<PartitionKeyRange>> {
        match self.ranges.as_slice() {
            [only] => Some(Arc::clone(only)),
            _ => None,
        }
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }
}

/// Collection rid → routing map cache, refreshed wholesale per collection.
pub struct RoutingMapCache<M> {
    provider: Arc<M>,
    maps: Mutex<HashMap<CollectionRid, Arc<CollectionRoutingMap>>>,
    gates: FlightGates<CollectionRid>,
}

impl<M: RoutingMapProvider> RoutingMapCache<M> {
    pub fn new(provider: Arc<M>) -> Self {
        Self {
            provider,
            maps: Mutex::new(HashMap::new()),
            gates: FlightGates::new(),
        }
    }

    /// Returns the routing map for `collection_rid`, fetching on miss or
    /// when `force_refresh` is set.
    ///
    /// `None` means the upstream reported the collection gone: the caller
    /// should refresh its collection cache and retry rather than fail.
    pub async fn lookup(
        &self,
        collection_rid: &CollectionRid,
        force_refresh: bool,
    ) -> Result<Option<Arc<CollectionRoutingMap>>> {
        let started = Instant::now();

        if !force_refresh {
            if let Some(map) = self.maps.lock().unwrap().get(collection_rid) {
                return Ok(Some(Arc::clone(map)));
            }
        }

        let gate = self.gates.gate(collection_rid);
        let _guard = gate.lock().await;

        // Another flight may have refreshed while we queued on the gate.
        if let Some(map) = self.maps.lock().unwrap().get(collection_rid) {
            if map.fetched_at >= started {
                return Ok(Some(Arc::clone(map)));
            }
        }

        match self.provider.ranges(collection_rid).await {
            Ok(ranges) => {
                let map = Arc::new(CollectionRoutingMap::new(
                    collection_rid.clone(),
                    ranges,
                    Instant::now(),
                )?);
                tracing::debug!(
                    collection = %collection_rid,
                    ranges = map.range_count(),
                    "routing map refreshed"
                );
                self.maps
                    .lock()
                    .unwrap()
                    .insert(collection_rid.clone(), Arc::clone(&map));
                Ok(Some(map))
            }
            Err(err)
                if matches!(
                    err.failure_kind(),
                    FailureKind::Gone | FailureKind::NotFound | FailureKind::PartitionKeyRangeGone
                ) =>
            {
                tracing::debug!(collection = %collection_rid, %err, "routing map reported gone");
                self.maps.lock().unwrap().remove(collection_rid);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn invalidate(&self, collection_rid: &CollectionRid) {
        self.maps.lock().unwrap().remove(collection_rid);
    }
}
