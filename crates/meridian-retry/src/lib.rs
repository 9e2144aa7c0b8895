//! # meridian-retry: retry and backoff state machines
//!
//! Two composed, time-boxed policies drive every retried operation:
//! [`RetryWithPolicy`] handles backend concurrency conflicts with a short
//! backoff; [`GoneRetryPolicy`] handles the topology-transient failure set,
//! pairing each kind with the cache-invalidation action that lets the next
//! attempt succeed. [`SessionTokenMismatchRetryPolicy`] is the separate,
//! tighter loop session-consistency reads run under.
//!
//! All mutable policy state (attempt counters, current backoff) is owned by
//! one in-flight logical operation; nothing here is shared or locked.

pub mod budget;
pub mod gone;
pub mod policy;
pub mod retry_with;
pub mod session;

pub use budget::{DEFAULT_RETRY_WINDOW, STRONG_RETRY_WINDOW, TimeBudget};
pub use gone::GoneRetryPolicy;
pub use policy::{ComposedRetryPolicy, PolicyVerdict, RetryDecision};
pub use retry_with::RetryWithPolicy;
pub use session::SessionTokenMismatchRetryPolicy;
