//! The transport contract.

use std::future::Future;

use meridian_types::{Endpoint, Result};

use crate::request::RequestContext;
use crate::response::StoreResponse;

/// One async round trip to a physical replica address.
///
/// Implementations normalize every outcome into either a [`StoreResponse`]
/// (success status) or a classified error: network-level failures carry
/// whether the request was confirmed sent; protocol-level error responses
/// carry status, sub-status, and headers. Callers never see transport-
/// specific error types.
pub trait TransportClient: Send + Sync + 'static {
    fn send(
        &self,
        endpoint: &Endpoint,
        ctx: &RequestContext,
    ) -> impl Future<Output = Result<StoreResponse>> + Send;
}

/// Runtime-selectable transport: binary protocol or HTTP fallback.
///
/// Both variants satisfy the same contract with no shared state; this enum
/// exists so the application can pick one at configuration time without
/// making every consumer generic over the choice.
pub enum AnyTransport {
    Binary(crate::binary::BinaryTransport),
    Http(crate::http::HttpTransport),
    #[cfg(any(test, feature = "mock"))]
    Mock(crate::mock::MockTransport),
}

impl TransportClient for AnyTransport {
    async fn send(&self, endpoint: &Endpoint, ctx: &RequestContext) -> Result<StoreResponse> {
        match self {
            AnyTransport::Binary(t) => t.send(endpoint, ctx).await,
            AnyTransport::Http(t) => t.send(endpoint, ctx).await,
            #[cfg(any(test, feature = "mock"))]
            AnyTransport::Mock(t) => t.send(endpoint, ctx).await,
        }
    }
}
