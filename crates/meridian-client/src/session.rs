//! The session token container.
//!
//! Tracks, per collection and partition range, the furthest session
//! progress this client has observed, so session-consistency reads never
//! see data older than the client's own prior writes/reads. Tokens only
//! ever advance (component-wise merge).

use std::collections::HashMap;
use std::sync::RwLock;

use meridian_types::{CollectionRid, PartitionRangeId, SessionToken};

/// Shared, read-mostly map of observed session tokens.
#[derive(Debug, Default)]
pub struct SessionContainer {
    inner: RwLock<HashMap<CollectionRid, HashMap<PartitionRangeId, SessionToken>>>,
}

impl SessionContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_for(
        &self,
        collection: &CollectionRid,
        range: &PartitionRangeId,
    ) -> Option<SessionToken> {
        self.inner
            .read()
            .unwrap()
            .get(collection)
            .and_then(|ranges| ranges.get(range))
            .copied()
    }

    /// Folds a response token in; progress never regresses.
    pub fn record(
        &self,
        collection: &CollectionRid,
        range: &PartitionRangeId,
        token: SessionToken,
    ) {
        let mut inner = self.inner.write().unwrap();
        let ranges = inner.entry(collection.clone()).or_default();
        let merged = match ranges.get(range) {
            Some(existing) => existing.merge(token),
            None => token,
        };
        ranges.insert(range.clone(), merged);
    }

    /// Drops a collection's tokens; used when the collection is recreated
    /// (its ranges restart numbering).
    pub fn clear_collection(&self, collection: &CollectionRid) {
        self.inner.write().unwrap().remove(collection);
    }
}
