//! Quorum read convergence.
//!
//! Strong (and bounded-staleness) reads fan out to a read quorum and accept
//! a result only once enough replicas agree on the highest observed LSN.
//! The first round contacts exactly the quorum; non-converging rounds widen
//! to every replica, since the disagreeing minority is what blocks
//! agreement.

use std::sync::Arc;
use std::time::Duration;

use meridian_routing::PartitionResolver;
use meridian_transport::{RequestContext, StoreResponse, TransportClient};
use meridian_types::{
    DataPlaneError, ReadMode, Result, StoreFailure, SubStatus, status_codes,
};

use crate::store_reader::{ReadOptions, ReadOutcome, StoreReader};
use crate::store_result::{StoreOutcome, StoreResult};

/// Rounds before giving up on convergence.
const MAX_QUORUM_READ_ATTEMPTS: u32 = 6;

/// Pause between non-converging rounds.
const QUORUM_READ_DELAY: Duration = Duration::from_millis(10);

/// Drives quorum reads over the fan-out engine.
pub struct QuorumReader<T, R> {
    store_reader: Arc<StoreReader<T, R>>,
}

impl<T, R> QuorumReader<T, R>
where
    T: TransportClient,
    R: PartitionResolver,
{
    pub fn new(store_reader: Arc<StoreReader<T, R>>) -> Self {
        Self { store_reader }
    }

    pub async fn read(
        &self,
        ctx: &mut RequestContext,
        read_quorum: usize,
        read_mode: ReadMode,
    ) -> Result<StoreResponse> {
        let mut last_failure: Option<StoreFailure> = None;

        for attempt in 0..MAX_QUORUM_READ_ATTEMPTS {
            if ctx.deadline_exceeded() {
                break;
            }

            let opts = ReadOptions {
                replica_count: read_quorum,
                require_valid_lsn: true,
                read_mode,
                // Widened rounds need the laggards' LSNs to see whether the
                // majority has moved.
                force_read_all: attempt > 0,
                ..ReadOptions::default()
            };

            let results = match self.store_reader.read_multiple(ctx, &opts).await? {
                ReadOutcome::RetryWithForceRefresh => continue,
                ReadOutcome::Results(results) => results,
            };

            for result in &results {
                if let StoreOutcome::Failure(failure) = &result.outcome {
                    last_failure = Some(failure.clone());
                }
            }

            let valid = |r: &StoreResult| r.is_success() && r.lsn() >= 0;
            if let Some(max_lsn) = results.iter().filter(|r| valid(r)).map(StoreResult::lsn).max()
            {
                let matching = results
                    .iter()
                    .filter(|r| valid(r) && r.lsn() == max_lsn)
                    .count();
                tracing::debug!(attempt, max_lsn, matching, read_quorum, "quorum read round");
                if matching >= read_quorum {
                    ctx.quorum_selected_lsn = max_lsn;
                    let selected = results.into_iter().find_map(|r| match r.outcome {
                        StoreOutcome::Success(response) if response.headers.lsn == max_lsn => {
                            Some(response)
                        }
                        _ => None,
                    });
                    if let Some(response) = selected {
                        return Ok(response);
                    }
                }
            }

            tokio::time::sleep(QUORUM_READ_DELAY).await;
        }

        let mut failure = StoreFailure::new(
            status_codes::GONE,
            SubStatus::None,
            format!("read quorum of {read_quorum} not met within {MAX_QUORUM_READ_ATTEMPTS} rounds"),
        );
        if let Some(identity) = ctx.identity() {
            failure = failure.with_identity(identity);
        }
        if let Some(last) = last_failure {
            failure = failure.with_headers(last.headers);
        }
        Err(DataPlaneError::Store(failure))
    }
}
