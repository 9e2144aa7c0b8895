//! The consistency writer and the global-strong write barrier.
//!
//! Writes always go to the partition's primary. On a STRONG account with
//! read regions, a write is only done when every region has durably
//! replicated it: if the response's global-committed LSN hasn't caught up
//! to the write's LSN yet, the writer polls barrier (HEAD) requests until
//! some replica reports it has, or a bounded attempt budget runs out. Most
//! multi-region replication catches up within tens of milliseconds, hence
//! the short first backoff tier; the long tier keeps polling from hammering
//! a genuinely lagging region.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use meridian_routing::{HealthTracker, PartitionResolver};
use meridian_transport::{RequestContext, StoreResponse, TransportClient};
use meridian_types::{
    ConsistencyLevel, DataPlaneError, OperationType, ReadMode, Result, StoreFailure, SubStatus,
    status_codes,
};

use crate::store_reader::{ReadOptions, ReadOutcome, StoreReader};

/// Barrier polls before giving up on global convergence.
const BARRIER_MAX_ATTEMPTS: u32 = 30;

/// Polls that use the short delay before switching to the long one.
const BARRIER_SHORT_TIER: u32 = 4;

const BARRIER_DELAY_SHORT: Duration = Duration::from_millis(10);
const BARRIER_DELAY_LONG: Duration = Duration::from_millis(30);

/// Write-side consistency engine.
pub struct ConsistencyWriter<T, R> {
    transport: Arc<T>,
    resolver: Arc<R>,
    store_reader: Arc<StoreReader<T, R>>,
    health: Arc<HealthTracker>,
    account_consistency: ConsistencyLevel,
}

impl<T, R> ConsistencyWriter<T, R>
where
    T: TransportClient,
    R: PartitionResolver,
{
    pub fn new(
        transport: Arc<T>,
        resolver: Arc<R>,
        store_reader: Arc<StoreReader<T, R>>,
        health: Arc<HealthTracker>,
        account_consistency: ConsistencyLevel,
    ) -> Self {
        Self {
            transport,
            resolver,
            store_reader,
            health,
            account_consistency,
        }
    }

    pub async fn write(&self, ctx: &mut RequestContext) -> Result<StoreResponse> {
        let Some(resolved) = self.resolver.resolve(ctx).await? else {
            return Err(DataPlaneError::Store(StoreFailure::new(
                status_codes::GONE,
                SubStatus::None,
                "resolution returned no partition",
            )));
        };

        let Some(primary) = resolved.replicas.primary().cloned() else {
            ctx.force_address_refresh = true;
            return Err(DataPlaneError::Store(
                StoreFailure::new(
                    status_codes::GONE,
                    SubStatus::None,
                    "partition has no primary replica",
                )
                .with_identity(resolved.identity.clone()),
            ));
        };

        match self.transport.send(&primary, ctx).await {
            Ok(response) => {
                self.health.mark_healthy(&primary);

                let global_strong = self.account_consistency == ConsistencyLevel::Strong
                    && response.headers.read_regions > 0;
                if global_strong {
                    let lsn = response.headers.lsn;
                    let committed = response.headers.global_committed_lsn;
                    if lsn < 0 {
                        return Err(DataPlaneError::Store(
                            StoreFailure::new(
                                status_codes::GONE,
                                SubStatus::None,
                                "write response carries no lsn; cannot verify global durability",
                            )
                            .with_identity(resolved.identity.clone()),
                        ));
                    }
                    ctx.global_committed_selected_lsn =
                        ctx.global_committed_selected_lsn.max(committed);
                    if committed < lsn {
                        tracing::debug!(lsn, committed, "entering global-strong write barrier");
                        self.wait_for_write_barrier(ctx, lsn).await?;
                    }
                }

                Ok(response)
            }
            Err(err) => {
                match &err {
                    DataPlaneError::Network { .. } => self.health.mark_unhealthy(&primary),
                    DataPlaneError::Store(failure) => {
                        if failure.status == status_codes::GONE
                            || failure.status == status_codes::REQUEST_TIMEOUT
                            || failure.status >= 500
                        {
                            self.health.mark_unhealthy(&primary);
                        }
                        if failure.headers.trigger_address_refresh {
                            // The backend asked for a rediscovery; do it
                            // without delaying this error.
                            let resolver = Arc::clone(&self.resolver);
                            let identity = resolved.identity.clone();
                            tokio::spawn(async move {
                                resolver.refresh_addresses(&identity).await;
                            });
                        }
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// Polls any-one-of the replicas until one reports the target LSN
    /// globally committed.
    async fn wait_for_write_barrier(&self, ctx: &mut RequestContext, target_lsn: i64) -> Result<()> {
        let mut barrier_ctx = ctx.clone();
        barrier_ctx.request.operation = OperationType::Head;
        barrier_ctx.request.body = Bytes::new();

        let opts = ReadOptions {
            replica_count: 1,
            read_mode: ReadMode::Strong,
            force_read_all: false,
            ..ReadOptions::default()
        };

        for attempt in 0..BARRIER_MAX_ATTEMPTS {
            if let ReadOutcome::Results(results) =
                self.store_reader.read_multiple(&mut barrier_ctx, &opts).await?
            {
                let observed = results
                    .iter()
                    .filter(|r| r.is_success())
                    .map(|r| r.global_committed_lsn())
                    .max()
                    .unwrap_or(-1);
                if observed >= 0 {
                    ctx.global_committed_selected_lsn =
                        ctx.global_committed_selected_lsn.max(observed);
                }
                if observed >= target_lsn {
                    tracing::debug!(attempt, observed, target_lsn, "write barrier met");
                    return Ok(());
                }
            }

            let delay = if attempt < BARRIER_SHORT_TIER {
                BARRIER_DELAY_SHORT
            } else {
                BARRIER_DELAY_LONG
            };
            tokio::time::sleep(delay).await;
        }

        tracing::warn!(
            target_lsn,
            observed = ctx.global_committed_selected_lsn,
            "global-strong write barrier not met"
        );
        let mut failure = StoreFailure::new(
            status_codes::GONE,
            SubStatus::GlobalStrongWriteBarrierNotMet,
            format!("global commit did not reach lsn {target_lsn} within {BARRIER_MAX_ATTEMPTS} polls"),
        );
        if let Some(identity) = ctx.identity() {
            failure = failure.with_identity(identity);
        }
        Err(DataPlaneError::Store(failure))
    }
}
