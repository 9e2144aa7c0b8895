//! # meridian-consistency: replica fan-out and consistency protocols
//!
//! The engine between routing and the wire: [`StoreReader`] fans a request
//! out to N replicas and normalizes what comes back; [`QuorumReader`]
//! converges strong reads on an agreed LSN; [`ConsistencyReader`] dispatches
//! by read mode (primary pin, quorum, session, any); [`ConsistencyWriter`]
//! writes through the primary and enforces the global-strong write barrier.

pub mod quorum;
pub mod reader;
pub mod store_reader;
pub mod store_result;
pub mod writer;

pub use quorum::QuorumReader;
pub use reader::ConsistencyReader;
pub use store_reader::{ReadOptions, ReadOutcome, StoreReader};
pub use store_result::{StoreOutcome, StoreResult};
pub use writer::ConsistencyWriter;
