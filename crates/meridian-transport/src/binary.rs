//! The custom binary protocol transport.
//!
//! Framing is length-prefixed postcard: a `u32` little-endian payload length
//! followed by the serialized envelope. The envelope treats the protocol's
//! byte encoding as opaque plumbing; everything the data plane cares about
//! travels in the normalized header map.
//!
//! One pooled connection per physical server, serialized per round trip.
//! The pool is owned by this value; dropping the last `Arc` owner closes
//! every connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use meridian_types::{
    DataPlaneError, Endpoint, OperationType, Result, ServerKey, StoreFailure, status_codes,
};

use crate::request::RequestContext;
use crate::response::StoreResponse;

/// Fixed limit to prevent unbounded memory use on a corrupt length prefix.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Binary transport tunables.
#[derive(Debug, Clone)]
pub struct BinaryTransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for BinaryTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// What goes on the wire for one request.
#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    operation: OperationType,
    path: String,
    headers: HashMap<String, String>,
    body: Bytes,
}

/// What comes back for one request.
#[derive(Debug, Serialize, Deserialize)]
struct WireResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Bytes,
}

/// The binary-protocol transport client.
pub struct BinaryTransport {
    config: BinaryTransportConfig,
    pool: Mutex<HashMap<ServerKey, Arc<Mutex<Option<TcpStream>>>>>,
}

impl BinaryTransport {
    pub fn new(config: BinaryTransportConfig) -> Self {
        Self {
            config,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Closes every pooled connection. Subsequent sends reconnect.
    pub async fn shutdown(&self) {
        self.pool.lock().await.clear();
    }

    pub(crate) async fn send(
        &self,
        endpoint: &Endpoint,
        ctx: &RequestContext,
    ) -> Result<StoreResponse> {
        let key = endpoint.server_key();
        let slot = {
            let mut pool = self.pool.lock().await;
            pool.entry(key).or_default().clone()
        };

        let mut conn = slot.lock().await;
        if conn.is_none() {
            let stream = timeout(
                self.config.connect_timeout,
                TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
            )
            .await
            .map_err(|_| network_error(endpoint, false, "connect timed out"))?
            .map_err(|e| network_error(endpoint, false, &e.to_string()))?;
            tracing::debug!(endpoint = %endpoint, "binary transport connected");
            *conn = Some(stream);
        }

        let wire = WireRequest {
            operation: ctx.request.operation,
            path: ctx.request.collection_link.clone(),
            headers: ctx.outgoing_headers(),
            body: ctx.request.body.clone(),
        };

        // Once any bytes may be out, errors must report the request as
        // possibly sent: a duplicate write is worse than a failed one.
        let outcome = timeout(self.config.request_timeout, round_trip(&mut conn, &wire)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(message)) => {
                *conn = None;
                return Err(network_error(endpoint, true, &message));
            }
            Err(_) => {
                *conn = None;
                return Err(network_error(endpoint, true, "request timed out"));
            }
        };

        normalize(endpoint, response)
    }
}

async fn round_trip(
    conn: &mut Option<TcpStream>,
    wire: &WireRequest,
) -> std::result::Result<WireResponse, String> {
    let stream = conn.as_mut().ok_or_else(|| "connection lost".to_owned())?;

    let payload = postcard::to_allocvec(wire).map_err(|e| e.to_string())?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(format!("request frame of {} bytes exceeds limit", payload.len()));
    }

    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .map_err(|e| e.to_string())?;
    stream.write_all(&payload).await.map_err(|e| e.to_string())?;

    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await.map_err(|e| e.to_string())?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(format!("response frame of {len} bytes exceeds limit"));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(|e| e.to_string())?;
    postcard::from_bytes(&payload).map_err(|e| e.to_string())
}

fn normalize(endpoint: &Endpoint, response: WireResponse) -> Result<StoreResponse> {
    if status_codes::is_success(response.status) {
        return Ok(StoreResponse::new(response.status, response.headers, response.body));
    }

    let parsed = meridian_types::ResponseHeaders::from_map(&response.headers);
    let message = String::from_utf8_lossy(&response.body).into_owned();
    tracing::debug!(
        endpoint = %endpoint,
        status = response.status,
        sub_status = ?parsed.sub_status,
        "binary transport error response"
    );
    Err(DataPlaneError::Store(
        StoreFailure::new(response.status, parsed.sub_status, message).with_headers(parsed),
    ))
}

fn network_error(endpoint: &Endpoint, request_sent: bool, message: &str) -> DataPlaneError {
    tracing::debug!(endpoint = %endpoint, request_sent, message, "binary transport network failure");
    DataPlaneError::Network {
        endpoint: endpoint.uri(),
        request_sent,
        message: message.to_owned(),
    }
}
