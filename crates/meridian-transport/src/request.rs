//! The request model: what the caller asked for, and the mutable state one
//! logical operation accumulates across its retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use meridian_types::{
    CollectionRid, ConsistencyLevel, OperationType, PartitionKey, PartitionKeyRange,
    PartitionRangeId, PartitionRangeIdentity, RegionName, ResourceClass, SessionToken,
    headers::{HDR_REMAINING_TIME_MS, HDR_RETRY_ATTEMPT, HDR_SESSION_TOKEN},
};

/// Immutable description of one logical operation, as handed in by the
/// caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRequest {
    pub operation: OperationType,
    pub resource_class: ResourceClass,
    /// Collection link (name path) the operation targets. Empty for master
    /// resources.
    pub collection_link: String,
    pub partition_key: Option<PartitionKey>,
    /// Explicit range targeting; bypasses partition-key resolution.
    pub partition_range_id: Option<PartitionRangeId>,
    /// Per-request consistency override. May only weaken the account
    /// default.
    pub consistency: Option<ConsistencyLevel>,
    pub session_token: Option<SessionToken>,
    /// Pins the read to one replica index; bypasses consistency logic.
    pub pinned_replica_index: Option<usize>,
    pub body: Bytes,
    pub headers: HashMap<String, String>,
}

impl StoreRequest {
    pub fn read(collection_link: impl Into<String>) -> Self {
        Self::new(OperationType::Read, collection_link)
    }

    pub fn write(collection_link: impl Into<String>, body: Bytes) -> Self {
        let mut request = Self::new(OperationType::Write, collection_link);
        request.body = body;
        request
    }

    pub fn head(collection_link: impl Into<String>) -> Self {
        Self::new(OperationType::Head, collection_link)
    }

    /// A read against the metadata/master partition.
    pub fn master_read() -> Self {
        let mut request = Self::new(OperationType::Read, "");
        request.resource_class = ResourceClass::Master;
        request
    }

    fn new(operation: OperationType, collection_link: impl Into<String>) -> Self {
        Self {
            operation,
            resource_class: ResourceClass::Document,
            collection_link: collection_link.into(),
            partition_key: None,
            partition_range_id: None,
            consistency: None,
            session_token: None,
            pinned_replica_index: None,
            body: Bytes::new(),
            headers: HashMap::new(),
        }
    }

    pub fn with_partition_key(mut self, key: PartitionKey) -> Self {
        self.partition_key = Some(key);
        self
    }

    pub fn with_partition_range_id(mut self, id: PartitionRangeId) -> Self {
        self.partition_range_id = Some(id);
        self
    }

    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = Some(level);
        self
    }

    pub fn with_session_token(mut self, token: SessionToken) -> Self {
        self.session_token = Some(token);
        self
    }
}

/// Mutable per-operation state, owned by the single in-flight operation.
///
/// Created when the operation enters the client, threaded through every
/// resolution/retry, destroyed when the operation completes or exhausts its
/// budget. Nothing here is shared across operations.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: StoreRequest,

    /// Resolved collection identity, once known.
    pub collection_rid: Option<CollectionRid>,
    /// Resolution from the current (or prior) attempt. Retries may only
    /// move this to a child of the previous range.
    pub resolved_range: Option<Arc<PartitionKeyRange>>,
    /// Region this attempt targets; rotated by cross-region fallback.
    pub region: Option<RegionName>,

    /// Effective session token for this operation (request override or the
    /// session container's view).
    pub session_token: Option<SessionToken>,

    // Cache-refresh escalation flags, set by the retry layer and consumed
    // by the next resolution.
    pub force_address_refresh: bool,
    pub force_routing_map_refresh: bool,
    pub force_name_cache_refresh: bool,

    pub attempt: u32,
    pub deadline: Option<Instant>,
    pub request_charge: f64,

    /// LSN selected by an in-flight quorum read, discarded when a split
    /// invalidates the replica set it came from.
    pub quorum_selected_lsn: i64,
    /// Highest global-committed LSN observed so far.
    pub global_committed_selected_lsn: i64,
}

impl RequestContext {
    pub fn new(request: StoreRequest) -> Self {
        let session_token = request.session_token;
        Self {
            request,
            collection_rid: None,
            resolved_range: None,
            region: None,
            session_token,
            force_address_refresh: false,
            force_routing_map_refresh: false,
            force_name_cache_refresh: false,
            attempt: 0,
            deadline: None,
            request_charge: 0.0,
            quorum_selected_lsn: -1,
            global_committed_selected_lsn: -1,
        }
    }

    /// The partition this operation currently resolves to, when known.
    pub fn identity(&self) -> Option<PartitionRangeIdentity> {
        if self.request.resource_class.is_master() {
            return Some(PartitionRangeIdentity::master());
        }
        let rid = self.collection_rid.clone()?;
        let range = self.resolved_range.as_ref()?;
        Some(PartitionRangeIdentity::new(rid, range.id.clone()))
    }

    /// Milliseconds left before the operation's deadline, if one is set.
    pub fn remaining_ms(&self) -> Option<u64> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()).as_millis() as u64)
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.remaining_ms() == Some(0)
    }

    pub fn record_charge(&mut self, charge: f64) {
        self.request_charge += charge;
    }

    /// Drops state tied to the invalidated replica set (split/migration).
    pub fn clear_resolution(&mut self) {
        self.resolved_range = None;
        self.quorum_selected_lsn = -1;
    }

    /// Headers for the next outgoing attempt: caller headers plus the
    /// retry-count/remaining-time pair and the effective session token.
    pub fn outgoing_headers(&self) -> HashMap<String, String> {
        let mut headers = self.request.headers.clone();
        headers.insert(HDR_RETRY_ATTEMPT.to_owned(), self.attempt.to_string());
        if let Some(remaining) = self.remaining_ms() {
            headers.insert(HDR_REMAINING_TIME_MS.to_owned(), remaining.to_string());
        }
        if let Some(token) = self.session_token {
            headers.insert(HDR_SESSION_TOKEN.to_owned(), token.to_string());
        }
        headers
    }
}
