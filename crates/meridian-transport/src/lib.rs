//! # meridian-transport: pluggable transports
//!
//! One trait, [`TransportClient`], with two interchangeable implementations:
//! the custom binary protocol ([`BinaryTransport`]) and the HTTP fallback
//! ([`HttpTransport`]). Both normalize into the same response/error shape so
//! nothing above this crate knows which wire it is on.
//!
//! A transport is constructed once by the application and shared by
//! reference-counted ownership; dropping the last owner closes its
//! connections. There is no process-global client.

pub mod binary;
pub mod client;
pub mod http;
pub mod request;
pub mod response;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use binary::{BinaryTransport, BinaryTransportConfig};
pub use client::{AnyTransport, TransportClient};
pub use http::HttpTransport;
pub use request::{RequestContext, StoreRequest};
pub use response::StoreResponse;
