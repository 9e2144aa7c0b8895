//! The ordered replica view over one cache entry.

use meridian_types::{Endpoint, Protocol, ServerKey};

/// Ordered endpoints for one partition range.
///
/// Read-mostly derived view: recomputed whenever the owning cache entry is
/// replaced, never mutated in place. Order is as reported by the address
/// feed, primary first when present.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaSet {
    endpoints: Vec<Endpoint>,
}

impl ReplicaSet {
    pub fn new(mut endpoints: Vec<Endpoint>) -> Self {
        // Primary-first keeps primary lookups O(1) without a side index.
        endpoints.sort_by_key(|e| !e.is_primary);
        Self { endpoints }
    }

    pub fn all(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn primary(&self) -> Option<&Endpoint> {
        self.endpoints.first().filter(|e| e.is_primary)
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| !e.is_primary)
    }

    pub fn by_protocol(&self, protocol: Protocol) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(move |e| e.protocol == protocol)
    }

    pub fn contains_server(&self, key: &ServerKey) -> bool {
        self.endpoints.iter().any(|e| &e.server_key() == key)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
