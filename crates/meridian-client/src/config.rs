//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use meridian_routing::AddressCacheConfig;
use meridian_types::{ConsistencyLevel, RegionName};

/// Configuration for a [`ReplicatedResourceClient`](crate::ReplicatedResourceClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The account's default consistency level. Per-request overrides may
    /// only weaken it.
    pub account_consistency: ConsistencyLevel,

    /// Read regions in preference order. Reads fail over down this list
    /// when a region exhausts its retries; writes stay in the first.
    pub preferred_read_regions: Vec<RegionName>,

    /// Wall-clock ceiling for one logical operation, across all retries
    /// and regions.
    pub operation_timeout: Option<Duration>,

    pub address_cache: AddressCacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            account_consistency: ConsistencyLevel::Session,
            preferred_read_regions: Vec::new(),
            operation_timeout: None,
            address_cache: AddressCacheConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.account_consistency = level;
        self
    }

    pub fn with_preferred_read_regions(mut self, regions: Vec<RegionName>) -> Self {
        self.preferred_read_regions = regions;
        self
    }
}
