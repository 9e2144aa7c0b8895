//! Per-key fetch gates.
//!
//! Concurrent cache misses for the same key must coalesce into a single
//! upstream fetch: the first caller holds the key's gate for the duration
//! of the fetch, later callers queue on it and re-check the cache once
//! admitted.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

pub(crate) struct FlightGates<K> {
    gates: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> FlightGates<K> {
    pub(crate) fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// The gate for `key`, created on first use.
    pub(crate) fn gate(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap();
        gates.entry(key.clone()).or_default().clone()
    }
}
