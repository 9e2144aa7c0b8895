//! The HTTP fallback transport.
//!
//! Same contract as the binary protocol: the normalized response/error shape
//! comes out, transport internals stay in. Connect errors are distinguished
//! from everything else because only they prove the request never left.

use std::collections::HashMap;

use reqwest::Client;

use meridian_types::{
    DataPlaneError, Endpoint, OperationType, Result, StoreFailure, status_codes,
};

use crate::request::RequestContext;
use crate::response::StoreResponse;

/// HTTP transport client, modeled after the binary one's contract.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = Client::builder().no_proxy().build().expect("http client");
        Self { client }
    }

    pub(crate) async fn send(
        &self,
        endpoint: &Endpoint,
        ctx: &RequestContext,
    ) -> Result<StoreResponse> {
        let url = format!("{}{}", endpoint.uri(), ctx.request.collection_link);
        let mut builder = match ctx.request.operation {
            OperationType::Read => self.client.get(&url),
            OperationType::Write => self.client.post(&url).body(ctx.request.body.clone()),
            OperationType::Head => self.client.head(&url),
        };

        for (name, value) in ctx.outgoing_headers() {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|err| {
            let request_sent = !err.is_connect();
            tracing::debug!(endpoint = %endpoint, request_sent, error = %err, "http transport failure");
            DataPlaneError::Network {
                endpoint: endpoint.uri(),
                request_sent,
                message: err.to_string(),
            }
        })?;

        let status = response.status().as_u16();
        let mut raw_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                raw_headers.insert(name.as_str().to_owned(), value.to_owned());
            }
        }

        let body = response.bytes().await.map_err(|err| DataPlaneError::Network {
            endpoint: endpoint.uri(),
            request_sent: true,
            message: err.to_string(),
        })?;

        if status_codes::is_success(status) {
            return Ok(StoreResponse::new(status, raw_headers, body));
        }

        let parsed = meridian_types::ResponseHeaders::from_map(&raw_headers);
        let message = String::from_utf8_lossy(&body).into_owned();
        Err(DataPlaneError::Store(
            StoreFailure::new(status, parsed.sub_status, message).with_headers(parsed),
        ))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}
