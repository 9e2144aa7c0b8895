//! Collection name → metadata cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use meridian_types::Result;

use crate::providers::{CollectionMetadata, CollectionProvider};
use crate::single_flight::FlightGates;

struct CachedCollection {
    metadata: Arc<CollectionMetadata>,
    fetched_at: Instant,
}

/// Caches collection link → (rid, partition key definition) resolutions.
///
/// A missing collection is a genuine error here (unlike the address and
/// routing-map caches): name resolution has nothing to fall back on.
pub struct CollectionCache<C> {
    provider: Arc<C>,
    entries: Mutex<HashMap<String, CachedCollection>>,
    gates: FlightGates<String>,
}

impl<C: CollectionProvider> CollectionCache<C> {
    pub fn new(provider: Arc<C>) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
            gates: FlightGates::new(),
        }
    }

    pub async fn resolve(
        &self,
        link: &str,
        force_refresh: bool,
    ) -> Result<Arc<CollectionMetadata>> {
        let started = Instant::now();

        if !force_refresh {
            if let Some(cached) = self.entries.lock().unwrap().get(link) {
                return Ok(Arc::clone(&cached.metadata));
            }
        }

        let gate = self.gates.gate(&link.to_owned());
        let _guard = gate.lock().await;

        if let Some(cached) = self.entries.lock().unwrap().get(link) {
            if cached.fetched_at >= started {
                return Ok(Arc::clone(&cached.metadata));
            }
        }

        let metadata = Arc::new(self.provider.collection(link).await?);
        tracing::debug!(link, rid = %metadata.rid, "collection metadata refreshed");
        self.entries.lock().unwrap().insert(
            link.to_owned(),
            CachedCollection {
                metadata: Arc::clone(&metadata),
                fetched_at: Instant::now(),
            },
        );
        Ok(metadata)
    }

    pub fn invalidate(&self, link: &str) {
        self.entries.lock().unwrap().remove(link);
    }
}
