//! The partition address cache.
//!
//! Maps a [`PartitionRangeIdentity`] to its current [`ReplicaSet`], lazily
//! populated with single-flight fetches and refreshed three ways: explicit
//! force (the retry layer reacting to Gone), implicit suboptimal expiry
//! (fewer live replicas than configured for too long), and invalidation by
//! physical server on endpoint-rediscovery signals.
//!
//! An empty result means "stale cache, refresh upstream and retry"; it is
//! never an error. A partition that provably no longer exists surfaces as a
//! Gone-class error from the resolver once the routing map is known fresh,
//! not from here. These two must never swap.
//!
//! Repeated forced refreshes escalate to a routing-map-forcing refresh under
//! a throttle: at least one address-only refresh must already have been
//! attempted for the range since the collection's last map-forcing refresh,
//! and the escalation interval must have elapsed. The escalation timestamp
//! advances by compare-and-swap, so concurrent callers elect one winner
//! without a lock. This bounds metadata-service load under 410 storms while
//! still converging after a split.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use meridian_types::{
    CollectionRid, FailureKind, PartitionRangeId, PartitionRangeIdentity, RegionName, Result,
    ServerKey,
};

use crate::health::HealthTracker;
use crate::providers::AddressProvider;
use crate::replica_set::ReplicaSet;

/// Address cache tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressCacheConfig {
    /// Replica count below which an entry is marked suboptimal.
    pub target_replica_set_size: usize,
    /// How long an entry may stay suboptimal before a forced re-fetch.
    pub suboptimal_refresh_after: Duration,
    /// Minimum spacing between routing-map-forcing refreshes per collection.
    pub map_refresh_escalation_interval: Duration,
}

impl Default for AddressCacheConfig {
    fn default() -> Self {
        Self {
            target_replica_set_size: 4,
            suboptimal_refresh_after: Duration::from_secs(600),
            map_refresh_escalation_interval: Duration::from_secs(30),
        }
    }
}

/// Outcome of one address lookup.
#[derive(Debug, Clone)]
pub struct AddressLookup {
    /// `None` signals a stale cache: refresh collection/routing-map and
    /// retry. Never raised as an error.
    pub replicas: Option<Arc<ReplicaSet>>,
    /// The forced-refresh throttle elected this caller to also force a
    /// routing-map refresh.
    pub escalate_routing_map_refresh: bool,
}

struct CacheEntry {
    replicas: Arc<ReplicaSet>,
    fetched_at: Instant,
    /// Milliseconds since cache epoch when the entry went suboptimal;
    /// 0 = optimal. Reset by compare-and-swap so exactly one caller claims
    /// the timed refresh.
    suboptimal_since_ms: AtomicU64,
}

#[derive(Default)]
struct Slot {
    entry: Mutex<Option<Arc<CacheEntry>>>,
    gate: tokio::sync::Mutex<()>,
}

/// Forced-refresh escalation timers for one collection.
///
/// Immutable reads plus CAS advancement; no monitor lock around the
/// decision.
#[derive(Default)]
struct EscalationState {
    /// Last routing-map-forcing refresh; 0 = never.
    last_map_forcing_ms: AtomicU64,
    /// Last forced address-only refresh per range.
    address_refresh_ms: Mutex<HashMap<PartitionRangeId, u64>>,
}

impl EscalationState {
    /// Decides whether this forced refresh also forces the routing map.
    /// Wins the election by CAS; losers observe the moved timestamp and
    /// back off.
    fn try_escalate(&self, range_id: &PartitionRangeId, now_ms: u64, interval_ms: u64) -> bool {
        let last_map = self.last_map_forcing_ms.load(Ordering::Acquire);

        let attempted_since_map_refresh = self
            .address_refresh_ms
            .lock()
            .unwrap()
            .get(range_id)
            .is_some_and(|&ts| ts > last_map);
        if !attempted_since_map_refresh {
            return false;
        }

        if last_map != 0 && now_ms.saturating_sub(last_map) < interval_ms {
            return false;
        }

        self.last_map_forcing_ms
            .compare_exchange(last_map, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn record_address_refresh(&self, range_id: &PartitionRangeId, now_ms: u64) {
        self.address_refresh_ms
            .lock()
            .unwrap()
            .insert(range_id.clone(), now_ms);
    }
}

/// The partition address cache.
pub struct PartitionAddressCache<P> {
    provider: Arc<P>,
    health: Arc<HealthTracker>,
    config: AddressCacheConfig,
    epoch: Instant,
    slots: Mutex<HashMap<PartitionRangeIdentity, Arc<Slot>>>,
    /// Master/metadata addresses live in a dedicated slot with the same
    /// suboptimal handling, outside the per-partition map.
    master: Arc<Slot>,
    escalations: Mutex<HashMap<CollectionRid, Arc<EscalationState>>>,
}

impl<P: AddressProvider> PartitionAddressCache<P> {
    pub fn new(provider: Arc<P>, health: Arc<HealthTracker>, config: AddressCacheConfig) -> Self {
        Self {
            provider,
            health,
            config,
            epoch: Instant::now(),
            slots: Mutex::new(HashMap::new()),
            master: Arc::new(Slot::default()),
            escalations: Mutex::new(HashMap::new()),
        }
    }

    pub async fn try_get_addresses(
        &self,
        identity: &PartitionRangeIdentity,
        region: Option<&RegionName>,
        force_refresh: bool,
    ) -> Result<AddressLookup> {
        let (slot, escalation) = if identity.is_master() {
            (Arc::clone(&self.master), None)
        } else {
            let slot = {
                let mut slots = self.slots.lock().unwrap();
                Arc::clone(slots.entry(identity.clone()).or_default())
            };
            let escalation = {
                let mut escalations = self.escalations.lock().unwrap();
                Arc::clone(
                    escalations
                        .entry(identity.collection_rid.clone())
                        .or_default(),
                )
            };
            (slot, Some(escalation))
        };

        self.lookup_slot(&slot, escalation.as_deref(), identity, region, force_refresh)
            .await
    }

    /// Drops every entry whose replica set includes `server`. Driven by
    /// transport-level endpoint-rediscovery signals.
    pub fn invalidate(&self, server: &ServerKey) {
        let slots = self.slots.lock().unwrap();
        let mut dropped = 0usize;
        for slot in slots.values() {
            let mut entry = slot.entry.lock().unwrap();
            if entry
                .as_ref()
                .is_some_and(|e| e.replicas.contains_server(server))
            {
                *entry = None;
                dropped += 1;
            }
        }
        let mut master = self.master.entry.lock().unwrap();
        if master
            .as_ref()
            .is_some_and(|e| e.replicas.contains_server(server))
        {
            *master = None;
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(%server, dropped, "invalidated address cache entries");
        }
    }

    async fn lookup_slot(
        &self,
        slot: &Slot,
        escalation: Option<&EscalationState>,
        identity: &PartitionRangeIdentity,
        region: Option<&RegionName>,
        force_refresh: bool,
    ) -> Result<AddressLookup> {
        let started = Instant::now();
        let now_ms = self.ms(started);
        let mut force = force_refresh;

        if !force {
            if let Some(entry) = slot.entry.lock().unwrap().clone() {
                let since = entry.suboptimal_since_ms.load(Ordering::Acquire);
                let expired = since != 0
                    && now_ms.saturating_sub(since)
                        >= self.config.suboptimal_refresh_after.as_millis() as u64;
                if !expired {
                    return Ok(AddressLookup {
                        replicas: Some(Arc::clone(&entry.replicas)),
                        escalate_routing_map_refresh: false,
                    });
                }
                // Claim the timed refresh exactly once; losers keep serving
                // the current entry.
                if entry
                    .suboptimal_since_ms
                    .compare_exchange(since, 0, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return Ok(AddressLookup {
                        replicas: Some(Arc::clone(&entry.replicas)),
                        escalate_routing_map_refresh: false,
                    });
                }
                tracing::debug!(%identity, "suboptimal replica set due for forced refresh");
                force = true;
            }
        }

        // Caller-driven forced refreshes feed the escalation throttle;
        // internal suboptimal refreshes do not.
        let escalate = force_refresh
            && escalation.is_some_and(|esc| {
                esc.try_escalate(
                    &identity.range_id,
                    now_ms,
                    self.config.map_refresh_escalation_interval.as_millis() as u64,
                )
            });

        let _guard = slot.gate.lock().await;

        // A concurrent flight may have refreshed while we queued.
        if let Some(entry) = slot.entry.lock().unwrap().clone() {
            if !force || entry.fetched_at >= started {
                return Ok(AddressLookup {
                    replicas: Some(Arc::clone(&entry.replicas)),
                    escalate_routing_map_refresh: escalate,
                });
            }
        }

        match self.provider.addresses(identity, region).await {
            Ok(endpoints) => {
                for endpoint in &endpoints {
                    self.health.mark_refreshed(endpoint);
                }
                let replicas = Arc::new(ReplicaSet::new(endpoints));
                let suboptimal = replicas.len() < self.config.target_replica_set_size;
                if suboptimal {
                    tracing::debug!(
                        %identity,
                        live = replicas.len(),
                        target = self.config.target_replica_set_size,
                        "replica set is suboptimal"
                    );
                }
                let entry = Arc::new(CacheEntry {
                    replicas: Arc::clone(&replicas),
                    fetched_at: Instant::now(),
                    suboptimal_since_ms: AtomicU64::new(if suboptimal {
                        self.ms(Instant::now())
                    } else {
                        0
                    }),
                });
                *slot.entry.lock().unwrap() = Some(entry);

                if force {
                    if let Some(esc) = escalation {
                        esc.record_address_refresh(&identity.range_id, self.ms(Instant::now()));
                    }
                }

                Ok(AddressLookup {
                    replicas: Some(replicas),
                    escalate_routing_map_refresh: escalate,
                })
            }
            Err(err)
                if matches!(
                    err.failure_kind(),
                    FailureKind::Gone | FailureKind::NotFound | FailureKind::PartitionKeyRangeGone
                ) =>
            {
                // Topology moved under us: clear the entry (and with it the
                // suboptimal marker) and let the caller's retry logic decide.
                tracing::debug!(%identity, %err, "address feed reported partition gone");
                *slot.entry.lock().unwrap() = None;
                Ok(AddressLookup {
                    replicas: None,
                    escalate_routing_map_refresh: escalate,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Milliseconds since the cache epoch, offset by one so 0 stays free
    /// as the "never" sentinel in the escalation timers.
    fn ms(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.epoch).as_millis() as u64 + 1
    }
}
