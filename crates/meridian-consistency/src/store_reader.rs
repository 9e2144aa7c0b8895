//! Replica fan-out.
//!
//! Sends one request to N of a partition's replicas concurrently, consuming
//! candidates in randomized order (uniform random start, sequential wrap)
//! with healthy endpoints biased to the front, and collects normalized
//! [`StoreResult`]s. Late results are ignored but their futures are drained
//! in the background so no failure is ever dropped unobserved.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use meridian_routing::{HealthTracker, PartitionResolver, ResolvedPartition};
use meridian_transport::{RequestContext, StoreResponse, TransportClient};
use meridian_types::{
    DataPlaneError, Endpoint, ReadMode, Result, StoreFailure, SubStatus, status_codes,
};

use crate::store_result::StoreResult;

/// Parameters for one fan-out.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Valid results to collect before stopping (ignored under
    /// `force_read_all`).
    pub replica_count: usize,
    /// Only successes carrying a non-negative LSN count as valid.
    pub require_valid_lsn: bool,
    /// Reinterpret not-found against the request's session token.
    pub use_session_token: bool,
    pub read_mode: ReadMode,
    /// Only successes at or past the session token's progress count as
    /// valid.
    pub check_min_lsn: bool,
    /// Exhaust every candidate regardless of collected valid results; used
    /// by barrier polling, which wants the maximum observed
    /// global-committed LSN.
    pub force_read_all: bool,
    pub include_primary: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            replica_count: 1,
            require_valid_lsn: false,
            use_session_token: false,
            read_mode: ReadMode::Any,
            check_min_lsn: false,
            force_read_all: false,
            include_primary: true,
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug)]
pub enum ReadOutcome {
    Results(Vec<StoreResult>),
    /// Fewer candidates than requested and this attempt had not yet forced
    /// an address refresh: the caller should re-issue (the refresh flag is
    /// already set). A second shortage comes back as a final partial set,
    /// preventing an infinite refresh loop against a genuinely small
    /// replica set.
    RetryWithForceRefresh,
}

/// The fan-out engine.
pub struct StoreReader<T, R> {
    transport: Arc<T>,
    resolver: Arc<R>,
    health: Arc<HealthTracker>,
    rng: Mutex<SmallRng>,
}

impl<T, R> StoreReader<T, R>
where
    T: TransportClient,
    R: PartitionResolver,
{
    pub fn new(transport: Arc<T>, resolver: Arc<R>, health: Arc<HealthTracker>) -> Self {
        Self {
            transport,
            resolver,
            health,
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    pub async fn read_multiple(
        &self,
        ctx: &mut RequestContext,
        opts: &ReadOptions,
    ) -> Result<ReadOutcome> {
        let already_forced = ctx.force_address_refresh;

        let Some(resolved) = self.resolver.resolve(ctx).await? else {
            // Stale caches; surface as retryable so the outer policy loops
            // with the refresh flags the resolver left behind.
            return Err(DataPlaneError::Store(StoreFailure::new(
                status_codes::GONE,
                SubStatus::None,
                "resolution returned no partition",
            )));
        };

        let candidates = self.order_candidates(&resolved, opts);
        if candidates.is_empty() {
            if !already_forced {
                ctx.force_address_refresh = true;
                return Ok(ReadOutcome::RetryWithForceRefresh);
            }
            return Err(DataPlaneError::Store(
                StoreFailure::new(
                    status_codes::GONE,
                    SubStatus::None,
                    "no replica candidates for partition",
                )
                .with_identity(resolved.identity.clone()),
            ));
        }
        if candidates.len() < opts.replica_count && !already_forced {
            ctx.force_address_refresh = true;
            tracing::debug!(
                identity = %resolved.identity,
                candidates = candidates.len(),
                wanted = opts.replica_count,
                "replica set smaller than requested; forcing refresh"
            );
            return Ok(ReadOutcome::RetryWithForceRefresh);
        }

        let needed = if opts.force_read_all {
            candidates.len()
        } else {
            opts.replica_count.min(candidates.len())
        };

        let snapshot = ctx.clone();
        let mut queue = candidates.into_iter();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, (Endpoint, Result<StoreResponse>)>> =
            FuturesUnordered::new();
        for _ in 0..needed {
            if let Some(endpoint) = queue.next() {
                in_flight.push(self.send_future(endpoint, &snapshot));
            }
        }

        let mut results = Vec::new();
        let mut valid = 0usize;

        while let Some((endpoint, outcome)) = in_flight.next().await {
            let result = self.normalize(endpoint, outcome, ctx, opts)?;
            let result_valid = Self::is_valid(&result, ctx, opts);
            if result_valid {
                valid += 1;
            }

            if result.is_gone() && !result.is_invalid_partition() && valid >= opts.replica_count {
                // Quorum already met; refresh the addresses behind the
                // current response's back.
                let resolver = Arc::clone(&self.resolver);
                let identity = resolved.identity.clone();
                tokio::spawn(async move {
                    resolver.refresh_addresses(&identity).await;
                });
            }

            results.push(result);

            if !opts.force_read_all {
                if valid >= opts.replica_count {
                    break;
                }
                if !result_valid {
                    if let Some(endpoint) = queue.next() {
                        in_flight.push(self.send_future(endpoint, &snapshot));
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            tokio::spawn(async move {
                while let Some((endpoint, outcome)) = in_flight.next().await {
                    if let Err(err) = outcome {
                        tracing::debug!(%endpoint, %err, "late fan-out result discarded");
                    }
                }
            });
        }

        Ok(ReadOutcome::Results(results))
    }

    /// Candidates in randomized order, healthy-first. Health is a bias:
    /// unhealthy endpoints sort last but are never removed.
    fn order_candidates(&self, resolved: &ResolvedPartition, opts: &ReadOptions) -> Vec<Endpoint> {
        let mut candidates: Vec<Endpoint> = match opts.read_mode {
            ReadMode::Primary => resolved.replicas.primary().cloned().into_iter().collect(),
            _ => resolved
                .replicas
                .all()
                .iter()
                .filter(|e| opts.include_primary || !e.is_primary)
                .cloned()
                .collect(),
        };
        if candidates.len() > 1 {
            let start = self.rng.lock().unwrap().gen_range(0..candidates.len());
            candidates.rotate_left(start);
            candidates.sort_by_key(|e| self.health.effective_status(e).rank());
            tracing::trace!(
                identity = %resolved.identity,
                start,
                candidates = candidates.len(),
                "fan-out candidate order"
            );
        }
        candidates
    }

    fn send_future(
        &self,
        endpoint: Endpoint,
        ctx: &RequestContext,
    ) -> BoxFuture<'static, (Endpoint, Result<StoreResponse>)> {
        let transport = Arc::clone(&self.transport);
        let ctx = ctx.clone();
        Box::pin(async move {
            let outcome = transport.send(&endpoint, &ctx).await;
            (endpoint, outcome)
        })
    }

    /// Folds a transport outcome into a [`StoreResult`], updating endpoint
    /// health and applying session reinterpretation.
    fn normalize(
        &self,
        endpoint: Endpoint,
        outcome: Result<StoreResponse>,
        ctx: &RequestContext,
        opts: &ReadOptions,
    ) -> Result<StoreResult> {
        match outcome {
            Ok(response) => {
                self.health.mark_healthy(&endpoint);
                Ok(StoreResult::success(endpoint, response))
            }
            Err(DataPlaneError::Store(mut failure)) => {
                if failure.status == status_codes::GONE
                    || failure.status == status_codes::REQUEST_TIMEOUT
                    || failure.status >= 500
                {
                    self.health.mark_unhealthy(&endpoint);
                } else {
                    self.health.mark_healthy(&endpoint);
                }

                if opts.use_session_token && failure.is_not_found() {
                    if let Some(required) = ctx.session_token {
                        let satisfied = failure
                            .headers
                            .session_token
                            .is_some_and(|observed| required.is_satisfied_by(observed));
                        if !satisfied {
                            // The document may exist at the session's point
                            // in time; this replica just hasn't caught up.
                            failure.sub_status = SubStatus::ReadSessionNotAvailable;
                            failure.headers.sub_status = SubStatus::ReadSessionNotAvailable;
                        }
                    }
                }

                Ok(StoreResult::failure(endpoint, failure))
            }
            Err(DataPlaneError::Network { message, .. }) => {
                self.health.mark_unhealthy(&endpoint);
                Ok(StoreResult::failure(
                    endpoint,
                    StoreFailure::new(status_codes::GONE, SubStatus::TransportGenerated, message),
                ))
            }
            Err(other) => Err(other),
        }
    }

    fn is_valid(result: &StoreResult, ctx: &RequestContext, opts: &ReadOptions) -> bool {
        if !result.is_success() {
            return false;
        }
        if opts.require_valid_lsn && result.lsn() < 0 {
            return false;
        }
        if opts.check_min_lsn {
            if let Some(required) = ctx.session_token {
                let caught_up = result
                    .session_token()
                    .is_some_and(|observed| required.is_satisfied_by(observed))
                    || result.lsn() >= required.global_lsn;
                if !caught_up {
                    return false;
                }
            }
        }
        true
    }
}
