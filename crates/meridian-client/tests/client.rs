//! End-to-end client behavior over the mock transport and a static
//! resolver.

use std::sync::Arc;

use bytes::Bytes;

use meridian_client::{ClientConfig, ReplicatedResourceClient};
use meridian_routing::HealthTracker;
use meridian_routing::mock::{StaticResolver, test_partition};
use meridian_transport::mock::{MockReply, MockTransport};
use meridian_transport::{AnyTransport, StoreRequest};
use meridian_types::{
    ConsistencyLevel, DataPlaneError, Endpoint, FailureKind, RegionName, ResponseHeaders,
    ServerKey, SessionToken, SubStatus, status_codes,
};

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

fn client(
    transport: MockTransport,
    n: usize,
    config: ClientConfig,
) -> (
    ReplicatedResourceClient<AnyTransport, StaticResolver>,
    Arc<AnyTransport>,
    Arc<StaticResolver>,
) {
    let transport = Arc::new(AnyTransport::Mock(transport));
    let resolver = Arc::new(StaticResolver::new(test_partition("rid1", "0", endpoints(n))));
    let client = ReplicatedResourceClient::new(
        Arc::clone(&transport),
        Arc::clone(&resolver),
        Arc::new(HealthTracker::default()),
        config,
    );
    (client, transport, resolver)
}

fn mock(transport: &AnyTransport) -> &MockTransport {
    match transport {
        AnyTransport::Mock(m) => m,
        _ => unreachable!(),
    }
}

fn eventual() -> ClientConfig {
    ClientConfig::default().with_consistency(ConsistencyLevel::Eventual)
}

#[tokio::test]
async fn read_happy_path() {
    let mock_transport = MockTransport::new();
    mock_transport.set_fallback(MockReply::ok_with_lsn(5));
    let (client, transport, _) = client(mock_transport, 2, eventual());

    let response = client.invoke(StoreRequest::read("/colls/c1")).await.unwrap();
    assert_eq!(response.headers.lsn, 5);
    assert_eq!(mock(&transport).total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn gone_is_retried_to_success() {
    let mock_transport = MockTransport::new();
    mock_transport.enqueue(&server(0), MockReply::failure(status_codes::GONE, SubStatus::None));
    mock_transport.set_fallback(MockReply::ok_with_lsn(6));
    let (client, transport, _) = client(mock_transport, 1, eventual());

    let response = client.invoke(StoreRequest::read("/colls/c1")).await.unwrap();
    assert_eq!(response.headers.lsn, 6);
    assert_eq!(mock(&transport).total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn splitting_retries_immediately() {
    let mock_transport = MockTransport::new();
    mock_transport.enqueue(
        &server(0),
        MockReply::failure(status_codes::GONE, SubStatus::CompletingSplit),
    );
    mock_transport.set_fallback(MockReply::ok_with_lsn(6));
    let (client, transport, _) = client(mock_transport, 1, eventual());

    client.invoke(StoreRequest::read("/colls/c1")).await.unwrap();
    assert_eq!(mock(&transport).total_calls(), 2);
}

#[tokio::test]
async fn write_with_bytes_on_wire_is_never_retried() {
    let mock_transport = MockTransport::new();
    mock_transport.enqueue(&server(0), MockReply::network(true));
    mock_transport.set_fallback(MockReply::ok());
    let (client, transport, _) = client(mock_transport, 1, eventual());

    let err = client
        .invoke(StoreRequest::write("/colls/c1", Bytes::from_static(b"{}")))
        .await
        .unwrap_err();
    assert!(matches!(err, DataPlaneError::ServiceUnavailable { .. }));
    // The retry that would have succeeded never happened.
    assert_eq!(mock(&transport).total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unsent_write_is_safely_retried() {
    let mock_transport = MockTransport::new();
    mock_transport.enqueue(&server(0), MockReply::network(false));
    mock_transport.set_fallback(MockReply::ok());
    let (client, transport, _) = client(mock_transport, 1, eventual());

    client
        .invoke(StoreRequest::write("/colls/c1", Bytes::from_static(b"{}")))
        .await
        .unwrap();
    assert_eq!(mock(&transport).total_calls(), 2);
}

#[tokio::test]
async fn reads_fail_over_to_next_preferred_region() {
    let mock_transport = MockTransport::new();
    mock_transport.enqueue(
        &server(0),
        MockReply::failure(status_codes::SERVICE_UNAVAILABLE, SubStatus::None),
    );
    mock_transport.set_fallback(MockReply::ok_with_lsn(9));
    let config = eventual().with_preferred_read_regions(vec![
        RegionName::new("East US"),
        RegionName::new("West Europe"),
    ]);
    let (client, transport, _) = client(mock_transport, 1, config);

    let response = client.invoke(StoreRequest::read("/colls/c1")).await.unwrap();
    assert_eq!(response.headers.lsn, 9);
    assert_eq!(mock(&transport).total_calls(), 2);
}

#[tokio::test]
async fn writes_never_fail_over() {
    let mock_transport = MockTransport::new();
    mock_transport.enqueue(
        &server(0),
        MockReply::failure(status_codes::SERVICE_UNAVAILABLE, SubStatus::None),
    );
    mock_transport.set_fallback(MockReply::ok());
    let config = eventual().with_preferred_read_regions(vec![
        RegionName::new("East US"),
        RegionName::new("West Europe"),
    ]);
    let (client, transport, _) = client(mock_transport, 1, config);

    let err = client
        .invoke(StoreRequest::write("/colls/c1", Bytes::from_static(b"{}")))
        .await
        .unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::ServiceUnavailable);
    assert_eq!(mock(&transport).total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn request_charge_accumulates_across_attempts() {
    let mock_transport = MockTransport::new();
    let mut gone_headers = ResponseHeaders::default();
    gone_headers.request_charge = 1.0;
    mock_transport.enqueue(
        &server(0),
        MockReply::failure_with(status_codes::GONE, SubStatus::None, gone_headers),
    );
    let mut ok_headers = ResponseHeaders::default();
    ok_headers.lsn = 3;
    ok_headers.request_charge = 2.5;
    mock_transport.set_fallback(MockReply::ok_with(ok_headers));
    let (client, _, _) = client(mock_transport, 1, eventual());

    let response = client.invoke(StoreRequest::read("/colls/c1")).await.unwrap();
    assert!((response.headers.request_charge - 3.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn session_tokens_are_recorded_from_responses() {
    let mock_transport = MockTransport::new();
    let mut headers = ResponseHeaders::default();
    headers.lsn = 42;
    headers.session_token = Some(SessionToken::new(1, 42));
    mock_transport.set_fallback(MockReply::ok_with(headers));
    let (client, _, _) = client(mock_transport, 1, ClientConfig::default());

    client.invoke(StoreRequest::read("/colls/c1")).await.unwrap();
    assert_eq!(
        client.session_container().token_for(
            &meridian_types::CollectionRid::new("rid1"),
            &meridian_types::PartitionRangeId::new("0")
        ),
        Some(SessionToken::new(1, 42))
    );
}

#[tokio::test(start_paused = true)]
async fn recorded_session_token_gates_later_reads() {
    let mock_transport = MockTransport::new();
    // First read observes progress 1#50.
    let mut advanced = ResponseHeaders::default();
    advanced.lsn = 50;
    advanced.session_token = Some(SessionToken::new(1, 50));
    mock_transport.enqueue(&server(0), MockReply::ok_with(advanced));

    // Afterwards every replica serves a stale view at 1#30.
    let mut stale = ResponseHeaders::default();
    stale.session_token = Some(SessionToken::new(1, 30));
    mock_transport.set_fallback(MockReply::failure_with(
        status_codes::NOT_FOUND,
        SubStatus::None,
        stale,
    ));
    let (client, _, _) = client(mock_transport, 1, ClientConfig::default());

    client.invoke(StoreRequest::read("/colls/c1")).await.unwrap();

    // The second read carries 1#50; the lagging replica cannot satisfy it
    // and the dedicated classification surfaces.
    let err = client.invoke(StoreRequest::read("/colls/c1")).await.unwrap_err();
    assert_eq!(err.failure_kind(), FailureKind::ReadSessionNotAvailable);
}
