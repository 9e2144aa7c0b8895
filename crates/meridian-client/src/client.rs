//! The replicated resource client.
//!
//! Top of the data plane: wraps the consistency engine in the composed
//! retry policies, threads the session container through, accumulates
//! request charge across attempts, and fails reads over to the next
//! preferred region when one region's retries exhaust.

use std::sync::Arc;
use std::time::Instant;

use meridian_consistency::{ConsistencyReader, ConsistencyWriter, StoreReader};
use meridian_retry::{ComposedRetryPolicy, RetryDecision};
use meridian_routing::{HealthTracker, PartitionResolver};
use meridian_transport::{RequestContext, StoreRequest, StoreResponse, TransportClient};
use meridian_types::{
    ConsistencyLevel, DataPlaneError, FailureKind, RegionName, Result,
};

use crate::config::ClientConfig;
use crate::session::SessionContainer;

/// Orchestrates retry, consistency, and cross-region fallback around one
/// transport + resolver pair.
pub struct ReplicatedResourceClient<T, R> {
    reader: ConsistencyReader<T, R>,
    writer: ConsistencyWriter<T, R>,
    resolver: Arc<R>,
    session: Arc<SessionContainer>,
    config: ClientConfig,
}

impl<T, R> ReplicatedResourceClient<T, R>
where
    T: TransportClient,
    R: PartitionResolver,
{
    pub fn new(
        transport: Arc<T>,
        resolver: Arc<R>,
        health: Arc<HealthTracker>,
        config: ClientConfig,
    ) -> Self {
        let store_reader = Arc::new(StoreReader::new(
            Arc::clone(&transport),
            Arc::clone(&resolver),
            Arc::clone(&health),
        ));
        let reader = ConsistencyReader::new(
            Arc::clone(&store_reader),
            Arc::clone(&resolver),
            config.account_consistency,
        );
        let writer = ConsistencyWriter::new(
            transport,
            Arc::clone(&resolver),
            store_reader,
            health,
            config.account_consistency,
        );
        Self {
            reader,
            writer,
            resolver,
            session: Arc::new(SessionContainer::new()),
            config,
        }
    }

    pub fn session_container(&self) -> &SessionContainer {
        &self.session
    }

    /// The single operation entry point.
    pub async fn invoke(&self, request: StoreRequest) -> Result<StoreResponse> {
        let mut ctx = RequestContext::new(request);
        if let Some(timeout) = self.config.operation_timeout {
            ctx.deadline = Some(Instant::now() + timeout);
        }

        let is_write = ctx.request.operation.is_write();
        let strong_account = self.config.account_consistency == ConsistencyLevel::Strong;

        let regions: Vec<Option<RegionName>> = if self.config.preferred_read_regions.is_empty() {
            vec![None]
        } else {
            self.config
                .preferred_read_regions
                .iter()
                .cloned()
                .map(Some)
                .collect()
        };
        // Writes stay in the primary region; only reads walk the list.
        let region_count = if is_write { 1 } else { regions.len() };

        let mut last_error: Option<DataPlaneError> = None;

        for (index, region) in regions.into_iter().take(region_count).enumerate() {
            ctx.region = region;
            if index > 0 {
                tracing::info!(
                    region = ctx.region.as_ref().map(RegionName::as_str),
                    "failing read over to next preferred region"
                );
                // The address cache must repopulate against the new region.
                ctx.force_address_refresh = true;
            }

            let mut policy = ComposedRetryPolicy::new(strong_account);

            loop {
                if ctx.deadline_exceeded() {
                    return Err(DataPlaneError::service_unavailable(
                        "operation deadline exceeded",
                        last_error,
                    ));
                }

                ctx.attempt += 1;
                self.apply_session_token(&mut ctx).await;

                let outcome = if is_write {
                    self.writer.write(&mut ctx).await
                } else {
                    self.reader.read(&mut ctx).await
                };

                match outcome {
                    Ok(mut response) => {
                        policy.on_success();
                        self.record_success(&mut ctx, &mut response);
                        return Ok(response);
                    }
                    Err(err) => {
                        if let Some(headers) = err.headers() {
                            ctx.record_charge(headers.request_charge);
                        }
                        match policy.on_error(err, &mut ctx) {
                            RetryDecision::Retry { delay } => {
                                if !delay.is_zero() {
                                    tokio::time::sleep(delay).await;
                                }
                            }
                            RetryDecision::Fail(err) => {
                                let can_fail_over = !is_write
                                    && index + 1 < region_count
                                    && matches!(
                                        err.failure_kind(),
                                        FailureKind::ServiceUnavailable
                                            | FailureKind::ReadSessionNotAvailable
                                    );
                                if can_fail_over {
                                    last_error = Some(err);
                                    break;
                                }
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DataPlaneError::service_unavailable("all preferred regions exhausted", None)
        }))
    }

    /// Supplies the session container's token when the operation runs at
    /// session consistency and the caller didn't pin one.
    async fn apply_session_token(&self, ctx: &mut RequestContext) {
        let effective = ctx
            .request
            .consistency
            .map_or(self.config.account_consistency, |level| {
                level.max(self.config.account_consistency)
            });
        if effective != ConsistencyLevel::Session || ctx.session_token.is_some() {
            return;
        }

        // The token is per partition range; resolve (cached) if no prior
        // attempt already has.
        if ctx.resolved_range.is_none() {
            let _ = self.resolver.resolve(ctx).await;
        }
        if let Some(identity) = ctx.identity() {
            ctx.session_token = self
                .session
                .token_for(&identity.collection_rid, &identity.range_id);
        }
    }

    /// Session bookkeeping and charge accumulation on the final response.
    fn record_success(&self, ctx: &mut RequestContext, response: &mut StoreResponse) {
        ctx.record_charge(response.headers.request_charge);
        response.headers.request_charge = ctx.request_charge;

        if let (Some(token), Some(identity)) = (response.headers.session_token, ctx.identity()) {
            self.session
                .record(&identity.collection_rid, &identity.range_id, token);
        }
    }
}
