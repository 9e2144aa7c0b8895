//! Scripted in-memory transport for tests.
//!
//! Replies are queued per physical server; each send pops the next reply
//! for the target server, falling back to a configurable default. Delayed
//! replies cooperate with `tokio::time::pause`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use meridian_types::{
    DataPlaneError, Endpoint, ResponseHeaders, Result, ServerKey, StoreFailure, SubStatus,
};

use crate::request::RequestContext;
use crate::response::StoreResponse;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Success {
        status: u16,
        headers: ResponseHeaders,
        body: Bytes,
    },
    Failure(StoreFailure),
    Network {
        request_sent: bool,
    },
}

impl MockReply {
    pub fn ok() -> Self {
        Self::ok_with(ResponseHeaders::default())
    }

    pub fn ok_with(headers: ResponseHeaders) -> Self {
        MockReply::Success {
            status: 200,
            headers,
            body: Bytes::new(),
        }
    }

    pub fn ok_with_lsn(lsn: i64) -> Self {
        let headers = ResponseHeaders {
            lsn,
            ..ResponseHeaders::default()
        };
        Self::ok_with(headers)
    }

    pub fn failure(status: u16, sub_status: SubStatus) -> Self {
        MockReply::Failure(StoreFailure::new(status, sub_status, "scripted failure"))
    }

    pub fn failure_with(status: u16, sub_status: SubStatus, headers: ResponseHeaders) -> Self {
        MockReply::Failure(
            StoreFailure::new(status, sub_status, "scripted failure").with_headers(headers),
        )
    }

    pub fn network(request_sent: bool) -> Self {
        MockReply::Network { request_sent }
    }
}

impl Default for MockReply {
    fn default() -> Self {
        MockReply::ok()
    }
}

/// Scripted transport. Cheap to share; all state is internally locked.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<ServerKey, VecDeque<(MockReply, Duration)>>>,
    server_fallbacks: Mutex<HashMap<ServerKey, MockReply>>,
    fallback: Mutex<MockReply>,
    calls: Mutex<Vec<ServerKey>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next reply for `server`.
    pub fn enqueue(&self, server: &ServerKey, reply: MockReply) {
        self.enqueue_delayed(server, reply, Duration::ZERO);
    }

    /// Queues a reply that arrives after `delay`.
    pub fn enqueue_delayed(&self, server: &ServerKey, reply: MockReply, delay: Duration) {
        self.scripts
            .lock()
            .unwrap()
            .entry(server.clone())
            .or_default()
            .push_back((reply, delay));
    }

    /// Reply used when a server's queue is empty.
    pub fn set_fallback(&self, reply: MockReply) {
        *self.fallback.lock().unwrap() = reply;
    }

    /// Standing reply for one server, consulted after its queue but before
    /// the global fallback.
    pub fn set_server_fallback(&self, server: &ServerKey, reply: MockReply) {
        self.server_fallbacks
            .lock()
            .unwrap()
            .insert(server.clone(), reply);
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, server: &ServerKey) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| *k == server).count()
    }

    pub(crate) async fn send(
        &self,
        endpoint: &Endpoint,
        _ctx: &RequestContext,
    ) -> Result<StoreResponse> {
        let key = endpoint.server_key();
        self.calls.lock().unwrap().push(key.clone());

        let (reply, delay) = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(entry) => entry,
                None => {
                    let reply = self
                        .server_fallbacks
                        .lock()
                        .unwrap()
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| self.fallback.lock().unwrap().clone());
                    (reply, Duration::ZERO)
                }
            }
        };

        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        match reply {
            MockReply::Success {
                status,
                headers,
                body,
            } => Ok(StoreResponse {
                status,
                raw_headers: headers.to_map(),
                headers,
                body,
            }),
            MockReply::Failure(failure) => Err(DataPlaneError::Store(failure)),
            MockReply::Network { request_sent } => Err(DataPlaneError::Network {
                endpoint: endpoint.uri(),
                request_sent,
                message: "scripted network failure".to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::StoreRequest;

    #[tokio::test]
    async fn scripted_replies_pop_in_order() {
        let transport = MockTransport::new();
        let endpoint = Endpoint::parse("mrtp://node1:14331").unwrap();
        let key = endpoint.server_key();

        transport.enqueue(&key, MockReply::ok_with_lsn(5));
        transport.enqueue(&key, MockReply::failure(410, SubStatus::None));

        let ctx = RequestContext::new(StoreRequest::read("/colls/c1"));
        let first = transport.send(&endpoint, &ctx).await.unwrap();
        assert_eq!(first.headers.lsn, 5);

        let second = transport.send(&endpoint, &ctx).await.unwrap_err();
        assert_eq!(second.failure_kind(), meridian_types::FailureKind::Gone);

        // Queue exhausted: fallback (ok) applies.
        assert!(transport.send(&endpoint, &ctx).await.is_ok());
        assert_eq!(transport.total_calls(), 3);
        assert_eq!(transport.calls_to(&key), 3);
    }
}
