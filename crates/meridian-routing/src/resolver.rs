//! Request → (partition range, replica set) resolution.
//!
//! Resolution is an explicit state machine over three caches: collection
//! metadata, routing map, and partition addresses. Each state transition is
//! a pure decision over what is already known plus at most one cache call;
//! no shared mutable refresh state is captured across await points.
//!
//! The resolver returns `Ok(None)` when a cache is suspected stale and the
//! operation should be retried after a refresh. Genuinely-nonexistent
//! targets only become errors once the caches involved are known fresh
//! within this resolution attempt. These two outcomes never swap.

use std::future::Future;
use std::sync::Arc;

use meridian_types::{
    DataPlaneError, PartitionKeyRange, PartitionRangeId, PartitionRangeIdentity, Result,
    ServerKey, StoreFailure, SubStatus, status_codes,
};
use meridian_transport::RequestContext;

use crate::address_cache::PartitionAddressCache;
use crate::collection_cache::CollectionCache;
use crate::providers::{AddressProvider, CollectionProvider, RoutingMapProvider};
use crate::replica_set::ReplicaSet;
use crate::routing_map::RoutingMapCache;

/// Upper bound on state transitions for one resolution attempt. Every
/// refresh flag flips at most once, so a converging attempt needs far
/// fewer; hitting the bound falls back to empty-for-retry.
const MAX_RESOLUTION_STEPS: usize = 16;

/// A fully resolved request target.
#[derive(Debug, Clone)]
pub struct ResolvedPartition {
    pub identity: PartitionRangeIdentity,
    pub range: Arc<PartitionKeyRange>,
    pub replicas: Arc<ReplicaSet>,
}

/// Resolution as consumed by the consistency engine.
pub trait PartitionResolver: Send + Sync + 'static {
    /// Resolves the request's target. `Ok(None)` means stale caches; the
    /// caller retries after the refresh flags left on `ctx` take effect.
    fn resolve(
        &self,
        ctx: &mut RequestContext,
    ) -> impl Future<Output = Result<Option<ResolvedPartition>>> + Send;

    /// Fire-and-forget forced address refresh for one partition.
    fn refresh_addresses(
        &self,
        identity: &PartitionRangeIdentity,
    ) -> impl Future<Output = ()> + Send;
}

enum ResolutionState {
    NeedCollection,
    NeedRoutingMap { force: bool },
    NeedPartitionResolution,
    Resolved(Arc<PartitionKeyRange>),
}

/// The routing resolver: composes the three caches into one lookup.
pub struct AddressResolver<C, M, P> {
    collections: CollectionCache<C>,
    routing_maps: RoutingMapCache<M>,
    addresses: PartitionAddressCache<P>,
}

impl<C, M, P> AddressResolver<C, M, P>
where
    C: CollectionProvider,
    M: RoutingMapProvider,
    P: AddressProvider,
{
    pub fn new(
        collections: CollectionCache<C>,
        routing_maps: RoutingMapCache<M>,
        addresses: PartitionAddressCache<P>,
    ) -> Self {
        Self {
            collections,
            routing_maps,
            addresses,
        }
    }

    /// Endpoint-rediscovery signal: drop address entries for this server.
    pub fn invalidate_server(&self, server: &ServerKey) {
        self.addresses.invalidate(server);
    }

    async fn resolve_master(&self, ctx: &mut RequestContext) -> Result<Option<ResolvedPartition>> {
        let force = std::mem::take(&mut ctx.force_address_refresh);
        let identity = PartitionRangeIdentity::master();
        let lookup = self
            .addresses
            .try_get_addresses(&identity, ctx.region.as_ref(), force)
            .await?;
        Ok(lookup.replicas.map(|replicas| ResolvedPartition {
            identity: identity.clone(),
            range: Arc::new(PartitionKeyRange::full(PartitionRangeId::new("M"))),
            replicas,
        }))
    }

    async fn resolve_document(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Option<ResolvedPartition>> {
        let force_collection = std::mem::take(&mut ctx.force_name_cache_refresh);
        let force_map = std::mem::take(&mut ctx.force_routing_map_refresh);
        let force_addresses = std::mem::take(&mut ctx.force_address_refresh);

        let mut collection_refreshed = force_collection;
        let mut map_refreshed = force_map;
        let mut escalated = false;

        let mut collection = self
            .collections
            .resolve(&ctx.request.collection_link, force_collection)
            .await?;
        ctx.collection_rid = Some(collection.rid.clone());

        let mut map = None;
        let mut state = ResolutionState::NeedRoutingMap { force: force_map };

        for _ in 0..MAX_RESOLUTION_STEPS {
            match state {
                ResolutionState::NeedCollection => {
                    collection = self
                        .collections
                        .resolve(&ctx.request.collection_link, true)
                        .await?;
                    collection_refreshed = true;
                    ctx.collection_rid = Some(collection.rid.clone());
                    state = ResolutionState::NeedRoutingMap { force: false };
                }

                ResolutionState::NeedRoutingMap { force } => {
                    match self.routing_maps.lookup(&collection.rid, force).await? {
                        Some(fetched) => {
                            if force {
                                map_refreshed = true;
                            }
                            map = Some(fetched);
                            state = ResolutionState::NeedPartitionResolution;
                        }
                        None if !collection_refreshed => {
                            // The rid is unknown upstream: the name mapping
                            // is probably stale.
                            state = ResolutionState::NeedCollection;
                        }
                        None => {
                            return Err(DataPlaneError::Store(
                                StoreFailure::new(
                                    status_codes::NOT_FOUND,
                                    SubStatus::None,
                                    format!(
                                        "collection {} has no routing map",
                                        ctx.request.collection_link
                                    ),
                                ),
                            ));
                        }
                    }
                }

                ResolutionState::NeedPartitionResolution => {
                    let map = map.as_ref().expect("routing map resolved before this state");
                    match self.locate_range(ctx, map, &collection, collection_refreshed, map_refreshed)? {
                        Located::Range(range) => state = ResolutionState::Resolved(range),
                        Located::Transition(next) => state = next,
                        Located::Empty => return Ok(None),
                    }
                }

                ResolutionState::Resolved(range) => {
                    let identity = PartitionRangeIdentity::new(collection.rid.clone(), range.id.clone());
                    let lookup = self
                        .addresses
                        .try_get_addresses(&identity, ctx.region.as_ref(), force_addresses)
                        .await?;

                    if lookup.escalate_routing_map_refresh && !escalated {
                        escalated = true;
                        tracing::debug!(%identity, "escalating to routing-map-forcing refresh");
                        state = ResolutionState::NeedRoutingMap { force: true };
                        continue;
                    }

                    let Some(replicas) = lookup.replicas else {
                        // Address feed no longer knows the range: have the
                        // next attempt rebuild the routing view.
                        ctx.force_routing_map_refresh = true;
                        return Ok(None);
                    };

                    return self.finish(ctx, identity, range, replicas);
                }
            }
        }

        tracing::warn!(
            link = %ctx.request.collection_link,
            "resolution did not converge; retrying with refreshed caches"
        );
        ctx.force_name_cache_refresh = true;
        ctx.force_routing_map_refresh = true;
        Ok(None)
    }

    /// The four-way decision tree over an in-hand routing map.
    fn locate_range(
        &self,
        ctx: &mut RequestContext,
        map: &crate::routing_map::CollectionRoutingMap,
        collection: &crate::providers::CollectionMetadata,
        collection_refreshed: bool,
        map_refreshed: bool,
    ) -> Result<Located> {
        if let Some(range_id) = &ctx.request.partition_range_id {
            if let Some(range) = map.range_by_id(range_id) {
                return Ok(Located::Range(range));
            }
            // Gone is only finalized once both caches are fresh this
            // attempt; the map's own gone-witness is not trusted alone.
            if collection_refreshed && map_refreshed {
                let identity =
                    PartitionRangeIdentity::new(collection.rid.clone(), range_id.clone());
                return Err(DataPlaneError::Store(
                    StoreFailure::new(
                        status_codes::GONE,
                        SubStatus::PartitionKeyRangeGone,
                        format!("partition key range {range_id} no longer exists"),
                    )
                    .with_identity(identity),
                ));
            }
            if !map_refreshed {
                return Ok(Located::Transition(ResolutionState::NeedRoutingMap {
                    force: true,
                }));
            }
            return Ok(Located::Transition(ResolutionState::NeedCollection));
        }

        if let Some(key) = &ctx.request.partition_key {
            return match collection.partition_key.effective_key(key) {
                Ok(effective) => match map.range_for_key(&effective) {
                    Some(range) => Ok(Located::Range(range)),
                    None if !map_refreshed => {
                        Ok(Located::Transition(ResolutionState::NeedRoutingMap {
                            force: true,
                        }))
                    }
                    None => {
                        // A fresh map tiles the key space; treat a hole as
                        // stale state and let the retry rebuild everything.
                        ctx.force_routing_map_refresh = true;
                        Ok(Located::Empty)
                    }
                },
                Err(_) if !collection_refreshed => {
                    // Shape mismatch with a possibly-stale definition:
                    // refresh before blaming the caller.
                    Ok(Located::Transition(ResolutionState::NeedCollection))
                }
                Err(err) => Err(DataPlaneError::BadRequest(format!(
                    "partition key does not match collection definition: {err}"
                ))),
            };
        }

        if let Some(range) = map.single_range() {
            return Ok(Located::Range(range));
        }
        if collection_refreshed && map_refreshed {
            return Err(DataPlaneError::BadRequest(
                "request against a multi-range collection carries no partition key or range id"
                    .to_owned(),
            ));
        }
        if !map_refreshed {
            return Ok(Located::Transition(ResolutionState::NeedRoutingMap {
                force: true,
            }));
        }
        Ok(Located::Transition(ResolutionState::NeedCollection))
    }

    /// Continuity check, then hand the resolution out.
    fn finish(
        &self,
        ctx: &mut RequestContext,
        identity: PartitionRangeIdentity,
        range: Arc<PartitionKeyRange>,
        replicas: Arc<ReplicaSet>,
    ) -> Result<Option<ResolvedPartition>> {
        if let Some(previous) = &ctx.resolved_range {
            if previous.id != range.id && !range.has_parent(&previous.id) {
                // Routing never jumps partitions within a retry chain
                // except to a child of a split.
                let previous_identity = PartitionRangeIdentity::new(
                    identity.collection_rid.clone(),
                    previous.id.clone(),
                );
                tracing::warn!(
                    previous = %previous_identity,
                    current = %identity,
                    "resolution moved to an unrelated partition"
                );
                ctx.clear_resolution();
                return Err(DataPlaneError::InvalidTarget {
                    previous: previous_identity,
                    current: identity,
                });
            }
        }

        ctx.resolved_range = Some(Arc::clone(&range));
        tracing::trace!(%identity, replicas = replicas.len(), "request resolved");
        Ok(Some(ResolvedPartition {
            identity,
            range,
            replicas,
        }))
    }
}

enum Located {
    Range(Arc<PartitionKeyRange>),
    Transition(ResolutionState),
    Empty,
}

impl<C, M, P> PartitionResolver for AddressResolver<C, M, P>
where
    C: CollectionProvider,
    M: RoutingMapProvider,
    P: AddressProvider,
{
    async fn resolve(&self, ctx: &mut RequestContext) -> Result<Option<ResolvedPartition>> {
        if ctx.request.resource_class.is_master() {
            return self.resolve_master(ctx).await;
        }
        self.resolve_document(ctx).await
    }

    async fn refresh_addresses(&self, identity: &PartitionRangeIdentity) {
        if let Err(err) = self.addresses.try_get_addresses(identity, None, true).await {
            tracing::debug!(%identity, %err, "background address refresh failed");
        }
    }
}
