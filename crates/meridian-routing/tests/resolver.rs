//! End-to-end resolver behavior over scripted metadata providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use meridian_routing::{
    AddressCacheConfig, AddressProvider, AddressResolver, CollectionCache, CollectionMetadata,
    CollectionProvider, HealthTracker, PartitionAddressCache, PartitionResolver,
    RoutingMapCache, RoutingMapProvider,
};
use meridian_transport::{RequestContext, StoreRequest};
use meridian_types::{
    CollectionRid, DataPlaneError, Endpoint, FailureKind, PartitionKey, PartitionKeyDefinition,
    PartitionKeyRange, PartitionRangeId, PartitionRangeIdentity, RegionName, Result, StoreFailure,
    SubStatus, status_codes,
};

/// Scripted metadata service backing all three provider traits.
#[derive(Default)]
struct TestBackend {
    collections: Mutex<HashMap<String, CollectionMetadata>>,
    ranges: Mutex<HashMap<CollectionRid, Vec<PartitionKeyRange>>>,
    /// Ranges the address feed reports as gone.
    gone_ranges: Mutex<Vec<PartitionRangeId>>,
    collection_fetches: AtomicUsize,
    range_fetches: AtomicUsize,
    address_fetches: AtomicUsize,
}

impl TestBackend {
    fn put_collection(&self, link: &str, rid: &str, paths: usize) {
        self.collections.lock().unwrap().insert(
            link.to_owned(),
            CollectionMetadata {
                rid: CollectionRid::new(rid),
                partition_key: PartitionKeyDefinition::hash(
                    (0..paths).map(|i| format!("/k{i}")).collect(),
                ),
            },
        );
    }

    fn put_ranges(&self, rid: &str, ranges: Vec<PartitionKeyRange>) {
        self.ranges
            .lock()
            .unwrap()
            .insert(CollectionRid::new(rid), ranges);
    }

    fn mark_range_gone(&self, id: &str) {
        self.gone_ranges.lock().unwrap().push(PartitionRangeId::new(id));
    }
}

impl CollectionProvider for TestBackend {
    async fn collection(&self, link: &str) -> Result<CollectionMetadata> {
        self.collection_fetches.fetch_add(1, Ordering::SeqCst);
        self.collections
            .lock()
            .unwrap()
            .get(link)
            .cloned()
            .ok_or_else(|| {
                DataPlaneError::Store(StoreFailure::new(
                    status_codes::NOT_FOUND,
                    SubStatus::None,
                    format!("collection {link} not found"),
                ))
            })
    }
}

impl RoutingMapProvider for TestBackend {
    async fn ranges(&self, collection_rid: &CollectionRid) -> Result<Vec<PartitionKeyRange>> {
        self.range_fetches.fetch_add(1, Ordering::SeqCst);
        self.ranges
            .lock()
            .unwrap()
            .get(collection_rid)
            .cloned()
            .ok_or_else(|| {
                DataPlaneError::Store(StoreFailure::new(
                    status_codes::NOT_FOUND,
                    SubStatus::None,
                    format!("collection {collection_rid} unknown"),
                ))
            })
    }
}

impl AddressProvider for TestBackend {
    async fn addresses(
        &self,
        identity: &PartitionRangeIdentity,
        _region: Option<&RegionName>,
    ) -> Result<Vec<Endpoint>> {
        self.address_fetches.fetch_add(1, Ordering::SeqCst);
        if self.gone_ranges.lock().unwrap().contains(&identity.range_id) {
            return Err(DataPlaneError::Store(StoreFailure::new(
                status_codes::GONE,
                SubStatus::PartitionKeyRangeGone,
                "range replaced",
            )));
        }
        Ok((0..4)
            .map(|i| {
                Endpoint::parse(&format!("mrtp://{}-node{i}:14331", identity.range_id))
                    .unwrap()
                    .with_primary(i == 0)
            })
            .collect())
    }
}

fn resolver(backend: &Arc<TestBackend>) -> AddressResolver<TestBackend, TestBackend, TestBackend> {
    AddressResolver::new(
        CollectionCache::new(Arc::clone(backend)),
        RoutingMapCache::new(Arc::clone(backend)),
        PartitionAddressCache::new(
            Arc::clone(backend),
            Arc::new(HealthTracker::default()),
            AddressCacheConfig::default(),
        ),
    )
}

fn full_range(id: &str) -> PartitionKeyRange {
    PartitionKeyRange::full(PartitionRangeId::new(id))
}

#[tokio::test]
async fn resolves_by_partition_key() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("0")]);
    let resolver = resolver(&backend);

    let mut ctx = RequestContext::new(
        StoreRequest::read("/colls/c1").with_partition_key(PartitionKey::string("tenant-1")),
    );
    let resolved = resolver.resolve(&mut ctx).await.unwrap().unwrap();
    assert_eq!(resolved.identity.range_id.as_str(), "0");
    assert_eq!(resolved.replicas.len(), 4);
    assert_eq!(ctx.collection_rid, Some(CollectionRid::new("rid1")));
    assert!(ctx.resolved_range.is_some());
}

#[tokio::test]
async fn resolves_by_explicit_range_id() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("7")]);
    let resolver = resolver(&backend);

    let mut ctx = RequestContext::new(
        StoreRequest::read("/colls/c1").with_partition_range_id(PartitionRangeId::new("7")),
    );
    let resolved = resolver.resolve(&mut ctx).await.unwrap().unwrap();
    assert_eq!(resolved.identity.range_id.as_str(), "7");
}

#[tokio::test]
async fn unknown_range_id_with_fresh_caches_is_gone() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("0")]);
    let resolver = resolver(&backend);

    let mut ctx = RequestContext::new(
        StoreRequest::read("/colls/c1").with_partition_range_id(PartitionRangeId::new("9")),
    );
    let err = resolver.resolve(&mut ctx).await.unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::PartitionKeyRangeGone);
}

#[tokio::test]
async fn single_range_collection_needs_no_partition_key() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("0")]);
    let resolver = resolver(&backend);

    let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
    let resolved = resolver.resolve(&mut ctx).await.unwrap().unwrap();
    assert_eq!(resolved.identity.range_id.as_str(), "0");
}

#[tokio::test]
async fn multi_range_collection_without_key_is_bad_request() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    let def = PartitionKeyDefinition::hash(vec!["/k0".to_owned()]);
    let boundary = def
        .effective_key(&PartitionKey::string("anything"))
        .unwrap();
    backend.put_ranges(
        "rid1",
        vec![
            PartitionKeyRange::new(
                PartitionRangeId::new("1"),
                meridian_types::EffectivePartitionKey::range_min(),
                boundary.clone(),
            ),
            PartitionKeyRange::new(
                PartitionRangeId::new("2"),
                boundary,
                meridian_types::EffectivePartitionKey::range_max(),
            ),
        ],
    );
    let resolver = resolver(&backend);

    let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
    let err = resolver.resolve(&mut ctx).await.unwrap_err();
    assert!(matches!(err, DataPlaneError::BadRequest(_)));
}

#[tokio::test]
async fn stale_partition_key_definition_refreshes_before_failing() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("0")]);
    let resolver = resolver(&backend);

    // Prime the collection cache with the single-path definition.
    let mut ctx = RequestContext::new(
        StoreRequest::read("/colls/c1").with_partition_key(PartitionKey::string("a")),
    );
    resolver.resolve(&mut ctx).await.unwrap().unwrap();

    // The collection was recreated with a two-path key; a two-component
    // request only matches after a refresh.
    backend.put_collection("/colls/c1", "rid1", 2);
    let two_part = PartitionKey(vec![
        meridian_types::PartitionKeyValue::String("a".to_owned()),
        meridian_types::PartitionKeyValue::String("b".to_owned()),
    ]);
    let mut ctx =
        RequestContext::new(StoreRequest::read("/colls/c1").with_partition_key(two_part));
    let resolved = resolver.resolve(&mut ctx).await.unwrap();
    assert!(resolved.is_some());
}

#[tokio::test]
async fn key_mismatch_against_fresh_definition_is_client_error() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("0")]);
    let resolver = resolver(&backend);

    let two_part = PartitionKey(vec![
        meridian_types::PartitionKeyValue::String("a".to_owned()),
        meridian_types::PartitionKeyValue::String("b".to_owned()),
    ]);
    let mut ctx =
        RequestContext::new(StoreRequest::read("/colls/c1").with_partition_key(two_part));
    let err = resolver.resolve(&mut ctx).await.unwrap_err();
    assert!(matches!(err, DataPlaneError::BadRequest(_)));
}

#[tokio::test]
async fn split_child_resolution_is_continuous() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("1")]);
    let resolver = resolver(&backend);

    let key = PartitionKey::string("tenant-1");
    let mut ctx =
        RequestContext::new(StoreRequest::read("/colls/c1").with_partition_key(key.clone()));
    let first = resolver.resolve(&mut ctx).await.unwrap().unwrap();
    assert_eq!(first.identity.range_id.as_str(), "1");

    // Range 1 splits into 2 and 3; the key lands in one of the children.
    let def = PartitionKeyDefinition::hash(vec!["/k0".to_owned()]);
    let epk = def.effective_key(&key).unwrap();
    let boundary = meridian_types::EffectivePartitionKey::new(format!("{epk}00"));
    backend.put_ranges(
        "rid1",
        vec![
            PartitionKeyRange::new(
                PartitionRangeId::new("2"),
                meridian_types::EffectivePartitionKey::range_min(),
                boundary.clone(),
            )
            .with_parents(vec![PartitionRangeId::new("1")]),
            PartitionKeyRange::new(
                PartitionRangeId::new("3"),
                boundary,
                meridian_types::EffectivePartitionKey::range_max(),
            )
            .with_parents(vec![PartitionRangeId::new("1")]),
        ],
    );

    // Retry after the split: force the map refresh the retry layer would.
    ctx.force_routing_map_refresh = true;
    let second = resolver.resolve(&mut ctx).await.unwrap().unwrap();
    assert_eq!(second.identity.range_id.as_str(), "2");
}

#[tokio::test]
async fn resolution_to_unrelated_sibling_raises_invalid_target() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("5")]);
    let resolver = resolver(&backend);

    let mut ctx = RequestContext::new(
        StoreRequest::read("/colls/c1").with_partition_key(PartitionKey::string("t")),
    );
    // A prior attempt resolved to an unrelated range.
    ctx.resolved_range = Some(Arc::new(full_range("9")));

    let err = resolver.resolve(&mut ctx).await.unwrap_err();
    assert!(matches!(err, DataPlaneError::InvalidTarget { .. }));
    // The stale resolution was cleared so the next attempt starts clean.
    assert!(ctx.resolved_range.is_none());
}

#[tokio::test]
async fn master_requests_skip_partition_logic() {
    let backend = Arc::new(TestBackend::default());
    let resolver = resolver(&backend);

    let mut ctx = RequestContext::new(StoreRequest::master_read());
    let resolved = resolver.resolve(&mut ctx).await.unwrap().unwrap();
    assert!(resolved.identity.is_master());
    assert_eq!(backend.collection_fetches.load(Ordering::SeqCst), 0);
    assert_eq!(backend.range_fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn gone_address_feed_returns_empty_for_retry() {
    let backend = Arc::new(TestBackend::default());
    backend.put_collection("/colls/c1", "rid1", 1);
    backend.put_ranges("rid1", vec![full_range("0")]);
    backend.mark_range_gone("0");
    let resolver = resolver(&backend);

    let mut ctx = RequestContext::new(
        StoreRequest::read("/colls/c1").with_partition_key(PartitionKey::string("t")),
    );
    let resolved = resolver.resolve(&mut ctx).await.unwrap();
    assert!(resolved.is_none());
    // The next attempt rebuilds the routing view.
    assert!(ctx.force_routing_map_refresh);
}
