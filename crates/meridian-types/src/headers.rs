//! Load-bearing response headers.
//!
//! Both transports normalize their responses into a flat string map; this
//! module names the headers the consistency and retry layers depend on and
//! parses them into a typed view. Unknown headers pass through untouched in
//! the raw map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::session::SessionToken;
use crate::status::SubStatus;

pub const HDR_LSN: &str = "x-meridian-lsn";
pub const HDR_QUORUM_ACKED_LSN: &str = "x-meridian-quorum-acked-lsn";
pub const HDR_GLOBAL_COMMITTED_LSN: &str = "x-meridian-global-committed-lsn";
pub const HDR_REPLICA_SET_SIZE: &str = "x-meridian-replica-set-size";
pub const HDR_WRITE_QUORUM: &str = "x-meridian-write-quorum";
pub const HDR_READ_REGIONS: &str = "x-meridian-read-regions";
pub const HDR_SESSION_TOKEN: &str = "x-meridian-session-token";
pub const HDR_REQUEST_CHARGE: &str = "x-meridian-request-charge";
pub const HDR_SUBSTATUS: &str = "x-meridian-substatus";
pub const HDR_TRIGGER_ADDRESS_REFRESH: &str = "x-meridian-trigger-address-refresh";

/// Echoed into outgoing requests so the backend can load-shed informedly.
pub const HDR_RETRY_ATTEMPT: &str = "x-retry-attempt-count";
pub const HDR_REMAINING_TIME_MS: &str = "x-remaining-time-ms";

/// Typed view over the headers of one replica response.
///
/// Absent numeric headers parse to `-1` (unknown), mirroring how the
/// backend omits LSN headers on responses that carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeaders {
    pub lsn: i64,
    pub quorum_acked_lsn: i64,
    pub global_committed_lsn: i64,
    pub replica_set_size: i32,
    pub write_quorum: i32,
    pub read_regions: u32,
    pub session_token: Option<SessionToken>,
    pub request_charge: f64,
    pub sub_status: SubStatus,
    pub trigger_address_refresh: bool,
}

impl Default for ResponseHeaders {
    fn default() -> Self {
        Self {
            lsn: -1,
            quorum_acked_lsn: -1,
            global_committed_lsn: -1,
            replica_set_size: -1,
            write_quorum: -1,
            read_regions: 0,
            session_token: None,
            request_charge: 0.0,
            sub_status: SubStatus::None,
            trigger_address_refresh: false,
        }
    }
}

impl ResponseHeaders {
    /// Parses the typed view out of a raw header map. Unparseable values
    /// are treated as absent.
    pub fn from_map(raw: &HashMap<String, String>) -> Self {
        fn num<T: std::str::FromStr>(raw: &HashMap<String, String>, key: &str, default: T) -> T {
            raw.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        Self {
            lsn: num(raw, HDR_LSN, -1),
            quorum_acked_lsn: num(raw, HDR_QUORUM_ACKED_LSN, -1),
            global_committed_lsn: num(raw, HDR_GLOBAL_COMMITTED_LSN, -1),
            replica_set_size: num(raw, HDR_REPLICA_SET_SIZE, -1),
            write_quorum: num(raw, HDR_WRITE_QUORUM, -1),
            read_regions: num(raw, HDR_READ_REGIONS, 0),
            session_token: raw.get(HDR_SESSION_TOKEN).and_then(|v| v.parse().ok()),
            request_charge: num(raw, HDR_REQUEST_CHARGE, 0.0),
            sub_status: SubStatus::from_code(num(raw, HDR_SUBSTATUS, 0u32)),
            trigger_address_refresh: raw
                .get(HDR_TRIGGER_ADDRESS_REFRESH)
                .is_some_and(|v| v == "true" || v == "1"),
        }
    }

    /// Renders the typed view back into a raw header map. Unknown-valued
    /// numerics are omitted, matching what a backend would send.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut raw = HashMap::new();
        if self.lsn >= 0 {
            raw.insert(HDR_LSN.to_owned(), self.lsn.to_string());
        }
        if self.quorum_acked_lsn >= 0 {
            raw.insert(HDR_QUORUM_ACKED_LSN.to_owned(), self.quorum_acked_lsn.to_string());
        }
        if self.global_committed_lsn >= 0 {
            raw.insert(
                HDR_GLOBAL_COMMITTED_LSN.to_owned(),
                self.global_committed_lsn.to_string(),
            );
        }
        if self.replica_set_size >= 0 {
            raw.insert(HDR_REPLICA_SET_SIZE.to_owned(), self.replica_set_size.to_string());
        }
        if self.write_quorum >= 0 {
            raw.insert(HDR_WRITE_QUORUM.to_owned(), self.write_quorum.to_string());
        }
        if self.read_regions > 0 {
            raw.insert(HDR_READ_REGIONS.to_owned(), self.read_regions.to_string());
        }
        if let Some(token) = self.session_token {
            raw.insert(HDR_SESSION_TOKEN.to_owned(), token.to_string());
        }
        if self.request_charge > 0.0 {
            raw.insert(HDR_REQUEST_CHARGE.to_owned(), self.request_charge.to_string());
        }
        if self.sub_status != SubStatus::None {
            raw.insert(HDR_SUBSTATUS.to_owned(), self.sub_status.code().to_string());
        }
        if self.trigger_address_refresh {
            raw.insert(HDR_TRIGGER_ADDRESS_REFRESH.to_owned(), "true".to_owned());
        }
        raw
    }
}
