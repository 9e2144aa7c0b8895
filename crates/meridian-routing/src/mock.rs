//! Static resolver for tests in dependent crates.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use meridian_types::{
    CollectionRid, DataPlaneError, Endpoint, PartitionKeyRange, PartitionRangeId,
    PartitionRangeIdentity, Result, StoreFailure,
};
use meridian_transport::RequestContext;

use crate::replica_set::ReplicaSet;
use crate::resolver::{PartitionResolver, ResolvedPartition};

/// One scripted resolution outcome.
#[derive(Debug, Clone)]
pub enum StaticOutcome {
    Partition(ResolvedPartition),
    /// Stale-cache signal: resolve returns `Ok(None)`.
    Empty,
    Fail(StoreFailure),
}

/// A resolver that serves a fixed partition, with an optional outcome
/// script consumed before the default.
pub struct StaticResolver {
    default: Mutex<ResolvedPartition>,
    script: Mutex<VecDeque<StaticOutcome>>,
    resolve_calls: AtomicUsize,
    refreshes: Mutex<Vec<PartitionRangeIdentity>>,
}

/// Builds a resolution over `endpoints` for tests.
pub fn test_partition(
    collection: &str,
    range_id: &str,
    endpoints: Vec<Endpoint>,
) -> ResolvedPartition {
    let rid = CollectionRid::new(collection);
    let range = Arc::new(PartitionKeyRange::full(PartitionRangeId::new(range_id)));
    ResolvedPartition {
        identity: PartitionRangeIdentity::new(rid, range.id.clone()),
        range,
        replicas: Arc::new(ReplicaSet::new(endpoints)),
    }
}

impl StaticResolver {
    pub fn new(default: ResolvedPartition) -> Self {
        Self {
            default: Mutex::new(default),
            script: Mutex::new(VecDeque::new()),
            resolve_calls: AtomicUsize::new(0),
            refreshes: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, outcome: StaticOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_default(&self, partition: ResolvedPartition) {
        *self.default.lock().unwrap() = partition;
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.lock().unwrap().len()
    }

    pub fn refreshed_identities(&self) -> Vec<PartitionRangeIdentity> {
        self.refreshes.lock().unwrap().clone()
    }
}

impl PartitionResolver for StaticResolver {
    async fn resolve(&self, ctx: &mut RequestContext) -> Result<Option<ResolvedPartition>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(StaticOutcome::Partition(partition)) => {
                ctx.collection_rid = Some(partition.identity.collection_rid.clone());
                ctx.resolved_range = Some(Arc::clone(&partition.range));
                Ok(Some(partition))
            }
            Some(StaticOutcome::Empty) => Ok(None),
            Some(StaticOutcome::Fail(failure)) => Err(DataPlaneError::Store(failure)),
            None => {
                let partition = self.default.lock().unwrap().clone();
                ctx.collection_rid = Some(partition.identity.collection_rid.clone());
                ctx.resolved_range = Some(Arc::clone(&partition.range));
                Ok(Some(partition))
            }
        }
    }

    async fn refresh_addresses(&self, identity: &PartitionRangeIdentity) {
        self.refreshes.lock().unwrap().push(identity.clone());
    }
}
