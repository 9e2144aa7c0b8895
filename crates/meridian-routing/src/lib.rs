//! # meridian-routing: address resolution and caching
//!
//! Maps a logical request target to the live physical replica set that
//! currently owns it, and keeps that mapping fresh across splits,
//! migrations, and failovers:
//!
//! - [`HealthTracker`] — per-endpoint health used to bias replica selection
//! - [`PartitionAddressCache`] — (collection, range) → replica endpoints,
//!   with single-flight fetches, suboptimal re-refresh, and throttled
//!   escalation to routing-map refreshes
//! - [`RoutingMapCache`] / [`CollectionRoutingMap`] — partition-key-range
//!   boundaries per collection
//! - [`AddressResolver`] — the per-request decision tree tying it together

pub mod address_cache;
pub mod collection_cache;
pub mod health;
pub mod providers;
pub mod replica_set;
pub mod resolver;
pub mod routing_map;

mod single_flight;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use address_cache::{AddressCacheConfig, AddressLookup, PartitionAddressCache};
pub use collection_cache::CollectionCache;
pub use health::{DEFAULT_RESET_WINDOW, HealthStatus, HealthTracker};
pub use providers::{AddressProvider, CollectionMetadata, CollectionProvider, RoutingMapProvider};
pub use replica_set::ReplicaSet;
pub use resolver::{AddressResolver, PartitionResolver, ResolvedPartition};
pub use routing_map::{CollectionRoutingMap, RoutingMapCache};
