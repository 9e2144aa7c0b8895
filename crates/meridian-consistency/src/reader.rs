//! The consistency reader: read-mode dispatch.
//!
//! Derives the read mode from the effective consistency level (the account
//! default, weakened by any per-request override) plus replica pinning, and
//! drives the fan-out engine accordingly. Quorum levels go through
//! [`QuorumReader`]; session reads chase their token under the dedicated
//! session retry policy; eventual reads take any single replica.

use std::sync::Arc;

use meridian_retry::SessionTokenMismatchRetryPolicy;
use meridian_routing::PartitionResolver;
use meridian_transport::{RequestContext, StoreResponse, TransportClient};
use meridian_types::{
    ConsistencyLevel, DataPlaneError, ReadMode, Result, StoreFailure, SubStatus, status_codes,
};

use crate::quorum::QuorumReader;
use crate::store_reader::{ReadOptions, ReadOutcome, StoreReader};
use crate::store_result::{StoreOutcome, StoreResult};

/// Read-side consistency engine.
pub struct ConsistencyReader<T, R> {
    store_reader: Arc<StoreReader<T, R>>,
    quorum_reader: QuorumReader<T, R>,
    resolver: Arc<R>,
    account_consistency: ConsistencyLevel,
}

impl<T, R> ConsistencyReader<T, R>
where
    T: TransportClient,
    R: PartitionResolver,
{
    pub fn new(
        store_reader: Arc<StoreReader<T, R>>,
        resolver: Arc<R>,
        account_consistency: ConsistencyLevel,
    ) -> Self {
        Self {
            quorum_reader: QuorumReader::new(Arc::clone(&store_reader)),
            store_reader,
            resolver,
            account_consistency,
        }
    }

    /// Per-request overrides may only weaken the account default.
    fn effective_consistency(&self, ctx: &RequestContext) -> ConsistencyLevel {
        ctx.request
            .consistency
            .map_or(self.account_consistency, |level| {
                level.max(self.account_consistency)
            })
    }

    fn read_mode(&self, ctx: &RequestContext, effective: ConsistencyLevel) -> ReadMode {
        if ctx.request.pinned_replica_index.is_some() {
            return ReadMode::Primary;
        }
        match effective {
            ConsistencyLevel::Strong => ReadMode::Strong,
            ConsistencyLevel::BoundedStaleness => ReadMode::BoundedStaleness,
            _ => ReadMode::Any,
        }
    }

    pub async fn read(&self, ctx: &mut RequestContext) -> Result<StoreResponse> {
        let effective = self.effective_consistency(ctx);
        let mode = self.read_mode(ctx, effective);
        tracing::trace!(%effective, ?mode, "dispatching read");

        match mode {
            ReadMode::Primary => self.read_one(ctx, ReadMode::Primary).await,
            ReadMode::Strong | ReadMode::BoundedStaleness => {
                // Bounded staleness shares the strong quorum path; the
                // write quorum is assumed to be a majority.
                let replica_set_size = match self.resolver.resolve(ctx).await? {
                    Some(resolved) => resolved.replicas.len(),
                    None => {
                        return Err(DataPlaneError::Store(StoreFailure::new(
                            status_codes::GONE,
                            SubStatus::None,
                            "resolution returned no partition",
                        )));
                    }
                };
                let read_quorum = replica_set_size - replica_set_size / 2;
                self.quorum_reader.read(ctx, read_quorum, mode).await
            }
            ReadMode::Any => {
                if effective == ConsistencyLevel::Session && ctx.session_token.is_some() {
                    self.read_session(ctx).await
                } else {
                    self.read_one(ctx, ReadMode::Any).await
                }
            }
        }
    }

    /// One replica, no reconciliation.
    async fn read_one(&self, ctx: &mut RequestContext, mode: ReadMode) -> Result<StoreResponse> {
        let opts = ReadOptions {
            replica_count: 1,
            read_mode: mode,
            ..ReadOptions::default()
        };
        loop {
            match self.store_reader.read_multiple(ctx, &opts).await? {
                ReadOutcome::RetryWithForceRefresh => continue,
                ReadOutcome::Results(results) => return Self::single_response(ctx, results),
            }
        }
    }

    /// One replica at a time until one satisfies the session token or the
    /// session retry budget expires.
    async fn read_session(&self, ctx: &mut RequestContext) -> Result<StoreResponse> {
        let mut policy = SessionTokenMismatchRetryPolicy::new();
        let opts = ReadOptions {
            replica_count: 1,
            use_session_token: true,
            check_min_lsn: true,
            read_mode: ReadMode::Any,
            ..ReadOptions::default()
        };
        let required = ctx.session_token;

        loop {
            let results = match self.store_reader.read_multiple(ctx, &opts).await? {
                ReadOutcome::RetryWithForceRefresh => continue,
                ReadOutcome::Results(results) => results,
            };

            let caught_up = results.iter().find(|r| {
                r.is_success()
                    && required.is_none_or(|token| {
                        r.session_token()
                            .is_some_and(|observed| token.is_satisfied_by(observed))
                            || r.lsn() >= token.global_lsn
                    })
            });
            if let Some(result) = caught_up {
                if let StoreOutcome::Success(response) = &result.outcome {
                    return Ok(response.clone());
                }
            }

            let session_miss = results.iter().any(|r| {
                matches!(&r.outcome, StoreOutcome::Failure(f) if f.sub_status == SubStatus::ReadSessionNotAvailable)
            });
            if !session_miss {
                // Some other failure (Gone, throttle): let the outer retry
                // policy classify it.
                return Self::single_response(ctx, results);
            }

            match policy.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    let mut failure = StoreFailure::new(
                        status_codes::NOT_FOUND,
                        SubStatus::ReadSessionNotAvailable,
                        "no replica satisfied the session token within the retry budget",
                    );
                    if let Some(identity) = ctx.identity() {
                        failure = failure.with_identity(identity);
                    }
                    if let Some(last) = results.into_iter().find_map(|r| match r.outcome {
                        StoreOutcome::Failure(f) => Some(f),
                        StoreOutcome::Success(_) => None,
                    }) {
                        failure = failure.with_headers(last.headers);
                    }
                    tracing::debug!("session read budget exhausted");
                    return Err(DataPlaneError::Store(failure));
                }
            }
        }
    }

    /// First success wins; otherwise the first failure surfaces.
    fn single_response(ctx: &RequestContext, results: Vec<StoreResult>) -> Result<StoreResponse> {
        let mut first_failure = None;
        for result in results {
            match result.outcome {
                StoreOutcome::Success(response) => return Ok(response),
                StoreOutcome::Failure(failure) => {
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
            }
        }
        let failure = first_failure.unwrap_or_else(|| {
            StoreFailure::new(
                status_codes::GONE,
                SubStatus::None,
                "fan-out produced no results",
            )
        });
        let failure = match ctx.identity() {
            Some(identity) => failure.with_identity(identity),
            None => failure,
        };
        Err(DataPlaneError::Store(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use meridian_routing::HealthTracker;
    use meridian_routing::mock::{StaticResolver, test_partition};
    use meridian_transport::mock::{MockReply, MockTransport};
    use meridian_transport::{AnyTransport, StoreRequest};
    use meridian_types::{Endpoint, FailureKind, ResponseHeaders, ServerKey, SessionToken};

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| {
                Endpoint::parse(&format!("mrtp://node{i}:14331"))
                    .unwrap()
                    .with_primary(i == 0)
            })
            .collect()
    }

    fn server(i: usize) -> ServerKey {
        ServerKey::new(format!("node{i}:14331"))
    }

    fn consistency_reader(
        transport: MockTransport,
        n: usize,
        account: ConsistencyLevel,
    ) -> (
        ConsistencyReader<AnyTransport, StaticResolver>,
        Arc<AnyTransport>,
    ) {
        let transport = Arc::new(AnyTransport::Mock(transport));
        let resolver = Arc::new(StaticResolver::new(test_partition("rid1", "0", endpoints(n))));
        let store_reader = Arc::new(StoreReader::new(
            Arc::clone(&transport),
            Arc::clone(&resolver),
            Arc::new(HealthTracker::default()),
        ));
        (
            ConsistencyReader::new(store_reader, resolver, account),
            transport,
        )
    }

    fn mock(transport: &AnyTransport) -> &MockTransport {
        match transport {
            AnyTransport::Mock(m) => m,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn eventual_read_contacts_one_replica() {
        let mock_transport = MockTransport::new();
        mock_transport.set_fallback(MockReply::ok_with_lsn(5));
        let (reader, transport) =
            consistency_reader(mock_transport, 4, ConsistencyLevel::Eventual);

        let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
        let response = reader.read(&mut ctx).await.unwrap();
        assert_eq!(response.headers.lsn, 5);
        assert_eq!(mock(&transport).total_calls(), 1);
    }

    #[tokio::test]
    async fn strong_read_uses_majority_quorum() {
        let mock_transport = MockTransport::new();
        mock_transport.set_fallback(MockReply::ok_with_lsn(8));
        let (reader, transport) = consistency_reader(mock_transport, 4, ConsistencyLevel::Strong);

        let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
        let response = reader.read(&mut ctx).await.unwrap();
        assert_eq!(response.headers.lsn, 8);
        // Quorum for n=4 is 2.
        assert_eq!(mock(&transport).total_calls(), 2);
    }

    #[tokio::test]
    async fn override_can_weaken_but_not_strengthen() {
        let mock_transport = MockTransport::new();
        mock_transport.set_fallback(MockReply::ok_with_lsn(8));
        let (reader, transport) = consistency_reader(mock_transport, 4, ConsistencyLevel::Eventual);

        // Requesting Strong on an Eventual account stays a one-replica read.
        let mut ctx = RequestContext::new(
            StoreRequest::read("/colls/c1").with_consistency(ConsistencyLevel::Strong),
        );
        reader.read(&mut ctx).await.unwrap();
        assert_eq!(mock(&transport).total_calls(), 1);
    }

    #[tokio::test]
    async fn pinned_replica_goes_to_primary() {
        let mock_transport = MockTransport::new();
        mock_transport.set_fallback(MockReply::ok_with_lsn(3));
        let (reader, transport) = consistency_reader(mock_transport, 4, ConsistencyLevel::Strong);

        let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
        ctx.request.pinned_replica_index = Some(0);
        reader.read(&mut ctx).await.unwrap();
        assert_eq!(mock(&transport).total_calls(), 1);
        assert_eq!(mock(&transport).calls_to(&server(0)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_read_retries_until_caught_up() {
        let mock_transport = MockTransport::new();
        // Every replica lags at first; the fallback finally catches up.
        let mut lagging = ResponseHeaders::default();
        lagging.session_token = Some(SessionToken::new(1, 30));
        for i in 0..2 {
            mock_transport.enqueue(
                &server(i),
                MockReply::failure_with(
                    meridian_types::status_codes::NOT_FOUND,
                    SubStatus::None,
                    lagging.clone(),
                ),
            );
        }
        let mut caught_up = ResponseHeaders::default();
        caught_up.lsn = 55;
        caught_up.session_token = Some(SessionToken::new(1, 55));
        mock_transport.set_fallback(MockReply::ok_with(caught_up));

        let (reader, _) = consistency_reader(mock_transport, 2, ConsistencyLevel::Session);

        let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
        ctx.session_token = Some(SessionToken::new(1, 50));
        let response = reader.read(&mut ctx).await.unwrap();
        assert_eq!(response.headers.lsn, 55);
    }

    #[tokio::test(start_paused = true)]
    async fn session_exhaustion_is_read_session_not_available() {
        let mock_transport = MockTransport::new();
        let mut lagging = ResponseHeaders::default();
        lagging.session_token = Some(SessionToken::new(1, 30));
        mock_transport.set_fallback(MockReply::failure_with(
            meridian_types::status_codes::NOT_FOUND,
            SubStatus::None,
            lagging,
        ));
        let (reader, _) = consistency_reader(mock_transport, 2, ConsistencyLevel::Session);

        let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
        ctx.session_token = Some(SessionToken::new(1, 50));
        let err = reader.read(&mut ctx).await.unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::ReadSessionNotAvailable);
    }

    #[tokio::test]
    async fn session_read_without_token_reads_any_replica() {
        let mock_transport = MockTransport::new();
        mock_transport.set_fallback(MockReply::ok_with_lsn(2));
        let (reader, transport) = consistency_reader(mock_transport, 3, ConsistencyLevel::Session);

        let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
        reader.read(&mut ctx).await.unwrap();
        assert_eq!(mock(&transport).total_calls(), 1);
    }

    #[tokio::test]
    async fn non_session_failures_pass_through_for_outer_retry() {
        let mock_transport = MockTransport::new();
        mock_transport.set_fallback(MockReply::failure(
            meridian_types::status_codes::GONE,
            SubStatus::None,
        ));
        let (reader, _) = consistency_reader(mock_transport, 2, ConsistencyLevel::Session);

        let mut ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
        ctx.session_token = Some(SessionToken::new(1, 50));
        // A Gone during a session read surfaces immediately (with session
        // reinterpretation it is not a session miss).
        tokio::time::timeout(Duration::from_secs(5), reader.read(&mut ctx))
            .await
            .expect("read should not hang")
            .unwrap_err();
    }
}
