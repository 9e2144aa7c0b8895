//! # meridian-types: Core types for the Meridian client data plane
//!
//! This crate contains shared types used across the Meridian client:
//! - Routing identities ([`CollectionRid`], [`PartitionRangeId`],
//!   [`PartitionRangeIdentity`], [`PartitionKeyRange`])
//! - Physical addresses ([`Endpoint`], [`Protocol`], [`ServerKey`])
//! - Consistency model ([`ConsistencyLevel`], [`ReadMode`], [`OperationType`],
//!   [`ResourceClass`])
//! - Wire status classification ([`SubStatus`], [`FailureKind`],
//!   [`StoreFailure`])
//! - Load-bearing response headers ([`ResponseHeaders`])
//! - Partition keys ([`PartitionKey`], [`PartitionKeyDefinition`],
//!   [`EffectivePartitionKey`])
//! - Session tokens ([`SessionToken`])
//! - The closed operational error type ([`DataPlaneError`])

pub mod consistency;
pub mod endpoint;
pub mod error;
pub mod headers;
pub mod identity;
pub mod partition_key;
pub mod session;
pub mod status;

pub use consistency::{ConsistencyLevel, OperationType, ReadMode, ResourceClass};
pub use endpoint::{Endpoint, EndpointParseError, Protocol, ServerKey};
pub use error::{DataPlaneError, FailureKind, Result, StoreFailure};
pub use headers::ResponseHeaders;
pub use identity::{CollectionRid, PartitionRangeId, PartitionRangeIdentity, RegionName};
pub use partition_key::{
    EffectivePartitionKey, PartitionKey, PartitionKeyDefinition, PartitionKeyError,
    PartitionKeyKind, PartitionKeyRange, PartitionKeyValue,
};
pub use session::{SessionToken, SessionTokenParseError};
pub use status::SubStatus;
pub use status::codes as status_codes;
