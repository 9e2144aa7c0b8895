//! The normalized success response shape shared by both transports.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use meridian_types::ResponseHeaders;

/// A successful replica response, normalized across transports.
///
/// Error-status responses never become a `StoreResponse`; the transport
/// converts them into a classified failure instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreResponse {
    pub status: u16,
    /// Typed view of the load-bearing headers.
    pub headers: ResponseHeaders,
    /// Full header map, for anything the typed view doesn't carry.
    pub raw_headers: HashMap<String, String>,
    pub body: Bytes,
}

impl StoreResponse {
    pub fn new(status: u16, raw_headers: HashMap<String, String>, body: Bytes) -> Self {
        let headers = ResponseHeaders::from_map(&raw_headers);
        Self {
            status,
            headers,
            raw_headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::headers::HDR_LSN;

    #[test]
    fn typed_view_is_derived_from_raw() {
        let mut raw = HashMap::new();
        raw.insert(HDR_LSN.to_owned(), "12".to_owned());
        raw.insert("x-custom".to_owned(), "y".to_owned());

        let response = StoreResponse::new(200, raw, Bytes::from_static(b"{}"));
        assert_eq!(response.headers.lsn, 12);
        assert_eq!(response.raw_headers.get("x-custom").unwrap(), "y");
    }
}
