//! # meridian-client: the replicated resource client
//!
//! The application-facing top of the Meridian data plane. One
//! [`ReplicatedResourceClient`] owns the consistency engine, the composed
//! retry policies, the session container, and cross-region read fallback;
//! [`ClientConfig`] carries the account-level knobs.
//!
//! The transport and resolver are constructed once by the application and
//! shared into the client by `Arc`; dropping the last owner releases the
//! underlying connections.

pub mod client;
pub mod config;
pub mod session;

pub use client::ReplicatedResourceClient;
pub use config::ClientConfig;
pub use session::SessionContainer;
