//! Peer-to-peer RPC transport (§4.1, C1): request/response, broadcast SSE, and a bulk byte
//! stream for migrations. A single HTTP+SSE transport per the coordination spec's resolved
//! Open Question — no separate websocket coordinator.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, State};
use axum::response::sse::{Event as SseAxumEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::legacy::NodeId;
use crate::types::Endpoint;

pub type RpcResult = Result<serde_json::Value, TransportError>;
pub type RpcFuture = Pin<Box<dyn Future<Output = RpcResult> + Send>>;
pub type RpcHandler = Arc<dyn Fn(serde_json::Value, NodeId) -> RpcFuture + Send + Sync>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: Uuid,
    pub method: String,
    pub params: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub from: NodeId,
    pub to: Option<NodeId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

pub const INTERNAL_ERROR_CODE: i64 = -32603;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    Connected { client_id: Uuid, node_id: NodeId },
    Custom { event: String, data: serde_json::Value },
}

struct BulkStreamState {
    chunks: Vec<Vec<u8>>,
    total_bytes: u64,
}

/// Carries peer RPC, the broadcast event stream, and bulk byte transfer over one bound port.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    node_id: NodeId,
    endpoints: DashMap<NodeId, Endpoint>,
    handlers: DashMap<String, RpcHandler>,
    client: reqwest::Client,
    bound_port: AtomicU16,
    running: AtomicBool,
    events: broadcast::Sender<BroadcastEvent>,
    sse_clients: DashMap<Uuid, ()>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    serve_handle: AsyncMutex<Option<JoinHandle<()>>>,
    bulk_streams: DashMap<String, AsyncMutex<BulkStreamState>>,
    rpc_timeout: Duration,
    sse_keepalive: Duration,
}

const BIND_RETRIES: u32 = 20;

impl Transport {
    pub fn new(node_id: NodeId, rpc_timeout: Duration, sse_keepalive: Duration) -> Self {
        let (events, _) = broadcast::channel(1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                node_id,
                endpoints: DashMap::new(),
                handlers: DashMap::new(),
                client: reqwest::Client::new(),
                bound_port: AtomicU16::new(0),
                running: AtomicBool::new(false),
                events,
                sse_clients: DashMap::new(),
                shutdown_tx,
                shutdown_rx,
                serve_handle: AsyncMutex::new(None),
                bulk_streams: DashMap::new(),
                rpc_timeout,
                sse_keepalive,
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    pub fn register_endpoint(&self, node_id: NodeId, endpoint: Endpoint) {
        self.inner.endpoints.insert(node_id, endpoint);
    }

    pub fn registered_endpoint(&self, node_id: &NodeId) -> Option<Endpoint> {
        self.inner.endpoints.get(node_id).map(|e| e.value().clone())
    }

    pub fn register_handler(&self, method: impl Into<String>, handler: RpcHandler) {
        self.inner.handlers.insert(method.into(), handler);
    }

    /// Binds a local port, auto-selecting a free one if `preferred_port` is busy.
    pub async fn start(&self, preferred_port: u16) -> Result<u16, TransportError> {
        let mut attempt = 0u32;
        let mut port = preferred_port;
        let listener = loop {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => break listener,
                Err(_) if attempt < BIND_RETRIES => {
                    attempt += 1;
                    port = preferred_port.wrapping_add(attempt as u16);
                }
                Err(_) => return Err(TransportError::BindError { attempts: attempt }),
            }
        };
        let bound_port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
        self.inner.bound_port.store(bound_port, Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);

        let app = self.clone().router();
        let mut shutdown_rx = self.inner.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = serve.await {
                warn!(error = %err, "transport server exited with error");
            }
        });
        *self.inner.serve_handle.lock().await = Some(handle);
        info!(port = bound_port, "transport started");
        Ok(bound_port)
    }

    /// Cancels the listener and notifies every SSE subscriber that the stream is closing.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(true);
        if let Some(handle) = self.inner.serve_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.inner.sse_clients.clear();
        info!("transport stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn bound_port(&self) -> u16 {
        self.inner.bound_port.load(Ordering::SeqCst)
    }

    /// Request/response; retries are the caller's decision, not this layer's.
    pub async fn call(
        &self,
        node: &NodeId,
        method: &str,
        params: serde_json::Value,
    ) -> RpcResult {
        if !self.is_running() {
            return Err(TransportError::Stopped);
        }
        let endpoint = self
            .inner
            .endpoints
            .get(node)
            .map(|e| e.value().clone())
            .ok_or_else(|| TransportError::NoEndpoint(node.clone()))?;

        let envelope = RequestEnvelope {
            id: Uuid::new_v4(),
            method: method.to_string(),
            params,
            timestamp: Utc::now(),
            from: self.inner.node_id.clone(),
            to: Some(node.clone()),
        };

        let url = format!("{}/rpc", endpoint.base_url());
        let response = tokio::time::timeout(
            self.inner.rpc_timeout,
            self.inner.client.post(&url).json(&envelope).send(),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            node: node.clone(),
            method: method.to_string(),
            timeout_ms: self.inner.rpc_timeout.as_millis() as u64,
        })?
        .map_err(|err| TransportError::ParseError(err.to_string()))?;

        let envelope: ResponseEnvelope = response
            .json()
            .await
            .map_err(|err| TransportError::ParseError(err.to_string()))?;

        match (envelope.result, envelope.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(TransportError::RemoteError {
                node: node.clone(),
                code: error.code,
                message: error.message,
            }),
            (None, None) => Ok(serde_json::Value::Null),
        }
    }

    /// Best-effort fan-out to every connected SSE subscriber; never fails the caller.
    pub fn broadcast(&self, event: impl Into<String>, data: serde_json::Value) {
        let message = BroadcastEvent::Custom { event: event.into(), data };
        // `send` only errors when there are no receivers, which is a no-op outcome here.
        let _ = self.inner.events.send(message);
    }

    pub fn connected_client_count(&self) -> usize {
        self.inner.sse_clients.len()
    }

    /// In-process subscription to the same broadcast stream external SSE clients see, used by
    /// components like `CacheSync` to receive peer sync messages without going over HTTP.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.inner.events.subscribe()
    }

    fn dispatch(&self, envelope: RequestEnvelope) -> RpcFuture {
        let handler = self.inner.handlers.get(&envelope.method).map(|h| h.clone());
        Box::pin(async move {
            match handler {
                Some(handler) => handler(envelope.params, envelope.from).await,
                None => Err(TransportError::ParseError(format!(
                    "no handler registered for method {}",
                    envelope.method
                ))),
            }
        })
    }

    /// Stores chunks for a stream id; returns the running total once the caller signals `last`.
    pub async fn upload_chunk(
        &self,
        stream_id: &str,
        chunk: Vec<u8>,
        last: bool,
    ) -> Result<u64, TransportError> {
        let entry = self
            .inner
            .bulk_streams
            .entry(stream_id.to_string())
            .or_insert_with(|| AsyncMutex::new(BulkStreamState { chunks: vec![], total_bytes: 0 }));
        let mut state = entry.lock().await;
        state.total_bytes += chunk.len() as u64;
        state.chunks.push(chunk);
        self.broadcast(
            "streamProgress",
            serde_json::json!({ "streamId": stream_id, "bytes": state.total_bytes, "done": last }),
        );
        Ok(state.total_bytes)
    }

    /// Yields previously uploaded chunks for a stream id, oldest first.
    pub async fn download_chunks(&self, stream_id: &str) -> Result<Vec<Vec<u8>>, TransportError> {
        match self.inner.bulk_streams.get(stream_id) {
            Some(entry) => Ok(entry.lock().await.chunks.clone()),
            None => Err(TransportError::NotImplemented(format!(
                "no uploaded stream found for {stream_id}"
            ))),
        }
    }

    fn router(self) -> Router {
        Router::new()
            .route("/rpc", post(handle_rpc))
            .route("/message", post(handle_rpc))
            .route("/events", get(handle_events))
            .route("/health", get(handle_health))
            .route("/peers", get(handle_peers))
            .route("/stream/:stream_id/upload", post(handle_stream_upload))
            .route("/stream/:stream_id/download", get(handle_stream_download))
            .with_state(self)
    }
}

async fn handle_rpc(
    State(transport): State<Transport>,
    Json(envelope): Json<RequestEnvelope>,
) -> Json<ResponseEnvelope> {
    let id = envelope.id;
    let result = transport.dispatch(envelope).await;
    let response = match result {
        Ok(value) => ResponseEnvelope { id, result: Some(value), error: None },
        Err(err) => ResponseEnvelope {
            id,
            result: None,
            error: Some(RpcErrorBody {
                code: INTERNAL_ERROR_CODE,
                message: err.to_string(),
                data: None,
            }),
        },
    };
    Json(response)
}

struct EventStreamState {
    transport: Transport,
    client_id: Uuid,
    receiver: broadcast::Receiver<BroadcastEvent>,
    shutdown_rx: watch::Receiver<bool>,
    pending_connected: Option<BroadcastEvent>,
}

async fn handle_events(
    State(transport): State<Transport>,
) -> Sse<impl Stream<Item = Result<SseAxumEvent, std::convert::Infallible>>> {
    let client_id = Uuid::new_v4();
    transport.inner.sse_clients.insert(client_id, ());
    let node_id = transport.inner.node_id.clone();
    let receiver = transport.inner.events.subscribe();
    let shutdown_rx = transport.inner.shutdown_rx.clone();

    let state = EventStreamState {
        transport,
        client_id,
        receiver,
        shutdown_rx,
        pending_connected: Some(BroadcastEvent::Connected { client_id, node_id }),
    };

    let sse_keepalive = state.transport.inner.sse_keepalive;
    let stream = futures::stream::unfold(state, |mut state| async move {
        if let Some(connected) = state.pending_connected.take() {
            let event = SseAxumEvent::default().json_data(&connected).unwrap();
            return Some((Ok(event), state));
        }
        loop {
            tokio::select! {
                received = state.receiver.recv() => {
                    match received {
                        Ok(event) => {
                            let sse_event = SseAxumEvent::default().json_data(&event).unwrap();
                            return Some((Ok(sse_event), state));
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => {
                            state.transport.inner.sse_clients.remove(&state.client_id);
                            return None;
                        }
                    }
                }
                changed = state.shutdown_rx.changed() => {
                    if changed.is_ok() && *state.shutdown_rx.borrow() {
                        state.transport.inner.sse_clients.remove(&state.client_id);
                        return None;
                    }
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(sse_keepalive))
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    node_id: NodeId,
    peer_ids: Vec<NodeId>,
    sse_clients: usize,
}

async fn handle_health(State(transport): State<Transport>) -> Json<HealthBody> {
    Json(HealthBody {
        status: if transport.is_running() { "ok" } else { "stopped" },
        node_id: transport.inner.node_id.clone(),
        peer_ids: transport.inner.endpoints.iter().map(|e| e.key().clone()).collect(),
        sse_clients: transport.connected_client_count(),
    })
}

#[derive(Serialize)]
struct PeersBody {
    node_id: NodeId,
    endpoint: Option<Endpoint>,
    peers: HashMap<NodeId, Endpoint>,
}

async fn handle_peers(State(transport): State<Transport>) -> Json<PeersBody> {
    let peers: HashMap<NodeId, Endpoint> = transport
        .inner
        .endpoints
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();
    Json(PeersBody {
        node_id: transport.inner.node_id.clone(),
        endpoint: peers.get(&transport.inner.node_id).cloned(),
        peers,
    })
}

async fn handle_stream_upload(
    State(transport): State<Transport>,
    AxumPath(stream_id): AxumPath<String>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    match transport.upload_chunk(&stream_id, body.to_vec(), false).await {
        Ok(total) => Json(serde_json::json!({ "totalBytes": total })).into_response(),
        Err(err) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            err.to_string(),
        )
            .into_response(),
    }
}

async fn handle_stream_download(
    State(transport): State<Transport>,
    AxumPath(stream_id): AxumPath<String>,
) -> impl IntoResponse {
    match transport.download_chunks(&stream_id).await {
        Ok(chunks) => (axum::http::StatusCode::OK, chunks.concat()).into_response(),
        Err(err) => (axum::http::StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}
