// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-cluster HTTP tunnel.
//!
//! Dashboard side: resolve the app, send a `proxy/http` request over the
//! peer channel, and reassemble the response from `proxy/chunk` pushes
//! into a streamed body. Executor side: resolve a ready pod by the
//! porpulsion label (round-robin), forward the request over plain HTTP,
//! and stream the response back as base64 chunks. Chunks ride the
//! reliable writer queue — dropping one would corrupt the stream.
//!
//! Hop-by-hop headers are stripped in both directions; Content-Length is
//! dropped in favour of chunked streaming.

use crate::channel::{ChannelError, ChannelManager};
use crate::executor::Executor;
use parking_lot::Mutex;
use porpulsion_core::{AppId, PeerName, Settings};
use porpulsion_wire::{method, new_request_id, ProxyChunkPush, ProxyHttpRequest};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Gap between chunks before the stream is abandoned.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Whole-request deadline.
const TOTAL_TIMEOUT: Duration = Duration::from_secs(300);

pub const DENIED: &str = "tunnel_denied";
pub const NOT_FOUND: &str = "app_not_found";

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel denied")]
    Denied,
    #[error("app not found")]
    NotFound,
    #[error(transparent)]
    Channel(ChannelError),
    #[error("stream idle timeout")]
    IdleTimeout,
    #[error("stream total timeout")]
    TotalTimeout,
    #[error("bad chunk: {0}")]
    BadChunk(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl From<ChannelError> for TunnelError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Remote(msg) if msg == DENIED => TunnelError::Denied,
            ChannelError::Remote(msg) if msg == NOT_FOUND => TunnelError::NotFound,
            other => TunnelError::Channel(other),
        }
    }
}

/// Headers never forwarded through the tunnel, either direction.
pub fn is_hop_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "host"
            | "connection"
            | "keep-alive"
            | "te"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    ) || lower.starts_with("proxy-")
}

/// Strip hop-by-hop headers from a header collection.
pub fn filter_headers<'a>(
    headers: impl Iterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<String, String> {
    headers
        .filter(|(name, _)| !is_hop_header(name))
        .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
        .collect()
}

/// Check `allowed_tunnel_peers` (`peer` or `peer/app-id` entries; empty =
/// all) plus the global toggle.
pub fn tunnel_allowed(settings: &Settings, peer: &PeerName, app: &AppId) -> bool {
    if !settings.allow_inbound_tunnels {
        return false;
    }
    let allowed = settings.allowed_tunnel_peers_list();
    if allowed.is_empty() {
        return true;
    }
    let scoped = format!("{}/{}", peer.as_str(), app.as_str());
    allowed.iter().any(|entry| entry == peer.as_str() || entry == &scoped)
}

// ── Dashboard side ────────────────────────────────────────────────────────

/// Response header block plus a chunk receiver feeding the HTTP body.
pub struct TunnelResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: mpsc::Receiver<Result<Vec<u8>, TunnelError>>,
}

/// In-flight tunnel streams on the requesting side, keyed by stream id.
/// The `proxy/chunk` push handler feeds them.
#[derive(Default)]
pub struct TunnelStreams {
    map: Mutex<HashMap<String, mpsc::Sender<ProxyChunkPush>>>,
}

impl TunnelStreams {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, stream_id: &str) -> mpsc::Receiver<ProxyChunkPush> {
        let (tx, rx) = mpsc::channel(64);
        self.map.lock().insert(stream_id.to_string(), tx);
        rx
    }

    pub fn remove(&self, stream_id: &str) {
        self.map.lock().remove(stream_id);
    }

    /// Deliver an incoming chunk push; unknown streams are dropped.
    pub async fn deliver(&self, chunk: ProxyChunkPush) {
        let tx = { self.map.lock().get(&chunk.stream_id).cloned() };
        match tx {
            Some(tx) => {
                let _ = tx.send(chunk).await;
            }
            None => {
                tracing::debug!(stream = %chunk.stream_id, "chunk for unknown stream dropped");
            }
        }
    }
}

/// Send a tunneled request over the peer channel and reassemble the
/// streamed response.
pub async fn proxy_over_channel(
    channels: &Arc<ChannelManager>,
    streams: &Arc<TunnelStreams>,
    peer: &PeerName,
    id: &AppId,
    port: u16,
    http_method: &str,
    path: &str,
    query: Option<String>,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
) -> Result<TunnelResponse, TunnelError> {
    use base64::Engine;

    let stream_id = new_request_id();
    let mut chunk_rx = streams.register(&stream_id);

    let request = ProxyHttpRequest {
        id: id.clone(),
        port,
        method: http_method.to_string(),
        path: path.to_string(),
        query,
        headers,
        body_b64: if body.is_empty() {
            None
        } else {
            Some(base64::engine::general_purpose::STANDARD.encode(&body))
        },
        stream_id: stream_id.clone(),
    };

    let payload = serde_json::to_value(&request)
        .map_err(|e| TunnelError::BadChunk(e.to_string()))?;
    let sent = channels
        .send_with(peer, method::PROXY_HTTP, payload, IDLE_TIMEOUT, None)
        .await;
    if let Err(e) = sent {
        streams.remove(&stream_id);
        return Err(e.into());
    }

    let deadline = tokio::time::Instant::now() + TOTAL_TIMEOUT;

    // The first chunk carries the status line and headers.
    let head = recv_chunk(&mut chunk_rx, deadline).await;
    let head = match head {
        Ok(chunk) => chunk,
        Err(e) => {
            streams.remove(&stream_id);
            return Err(e);
        }
    };
    let status = head.status.unwrap_or(502);
    let headers = head.headers.clone().unwrap_or_default();

    let (body_tx, body_rx) = mpsc::channel::<Result<Vec<u8>, TunnelError>>(64);

    let streams_for_task = Arc::clone(streams);
    let channels_for_task = Arc::clone(channels);
    let peer_for_task = peer.clone();
    let stream_for_task = stream_id.clone();
    tokio::spawn(async move {
        let mut current = Some(head);
        loop {
            let chunk = match current.take() {
                Some(chunk) => chunk,
                None => match recv_chunk(&mut chunk_rx, deadline).await {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = body_tx.send(Err(e)).await;
                        break;
                    }
                },
            };
            if let Some(encoded) = &chunk.chunk_b64 {
                match base64::engine::general_purpose::STANDARD.decode(encoded) {
                    Ok(bytes) => {
                        if body_tx.send(Ok(bytes)).await.is_err() {
                            // Client went away: cancel the remote stream.
                            let _ = channels_for_task.push(
                                &peer_for_task,
                                method::PROXY_CANCEL,
                                json!({"id": stream_for_task}),
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = body_tx.send(Err(TunnelError::BadChunk(e.to_string()))).await;
                        break;
                    }
                }
            }
            if chunk.is_final {
                break;
            }
        }
        streams_for_task.remove(&stream_for_task);
    });

    Ok(TunnelResponse { status, headers, body: body_rx })
}

async fn recv_chunk(
    rx: &mut mpsc::Receiver<ProxyChunkPush>,
    deadline: tokio::time::Instant,
) -> Result<ProxyChunkPush, TunnelError> {
    let idle = tokio::time::sleep(IDLE_TIMEOUT);
    tokio::pin!(idle);
    tokio::select! {
        chunk = rx.recv() => chunk.ok_or(TunnelError::IdleTimeout),
        _ = &mut idle => Err(TunnelError::IdleTimeout),
        _ = tokio::time::sleep_until(deadline) => Err(TunnelError::TotalTimeout),
    }
}

// ── Executor side ─────────────────────────────────────────────────────────

/// Serves inbound `proxy/http` requests against local pods.
pub struct TunnelServer {
    executor: Arc<Executor>,
    channels: Arc<ChannelManager>,
    registry: Arc<porpulsion_storage::StateRegistry>,
    http: reqwest::Client,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl TunnelServer {
    pub fn new(
        executor: Arc<Executor>,
        channels: Arc<ChannelManager>,
        registry: Arc<porpulsion_storage::StateRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            channels,
            registry,
            http: reqwest::Client::new(),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Handle a `proxy/http` request: admit, resolve a pod, reply, then
    /// stream the response back as chunk pushes.
    pub async fn handle(
        self: &Arc<Self>,
        peer: PeerName,
        request: ProxyHttpRequest,
    ) -> Result<serde_json::Value, String> {
        let settings = self.registry.settings();
        if !tunnel_allowed(&settings, &peer, &request.id) {
            return Err(DENIED.to_string());
        }

        let app = self.registry.app(&request.id).ok_or_else(|| NOT_FOUND.to_string())?;
        if app.source_peer.as_ref() != Some(&peer) {
            return Err(DENIED.to_string());
        }

        let ip = self
            .executor
            .ready_pod_ip(&request.id)
            .await
            .map_err(|e| format!("no_ready_pods: {e}"))?;

        let cancel = CancellationToken::new();
        self.active.lock().insert(request.stream_id.clone(), cancel.clone());

        let server = Arc::clone(self);
        let stream_id = request.stream_id.clone();
        let task_stream_id = stream_id.clone();
        tokio::spawn(async move {
            server.forward(peer, ip, request, cancel).await;
            server.active.lock().remove(&task_stream_id);
        });

        Ok(json!({"stream_id": stream_id}))
    }

    /// Observe a `proxy/cancel` push: stop the in-flight forward.
    pub fn cancel_stream(&self, stream_id: &str) {
        if let Some(token) = self.active.lock().get(stream_id) {
            token.cancel();
        }
    }

    async fn forward(
        &self,
        peer: PeerName,
        ip: String,
        request: ProxyHttpRequest,
        cancel: CancellationToken,
    ) {
        use base64::Engine;
        use futures_util::StreamExt;

        let stream_id = request.stream_id.clone();
        let url = match &request.query {
            Some(q) if !q.is_empty() => {
                format!("http://{ip}:{}{}?{q}", request.port, request.path)
            }
            _ => format!("http://{ip}:{}{}", request.port, request.path),
        };

        let http_method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                self.push_error_head(&peer, &stream_id, 400).await;
                return;
            }
        };
        let mut builder = self.http.request(http_method, &url).timeout(TOTAL_TIMEOUT);
        for (name, value) in &request.headers {
            if !is_hop_header(name) {
                builder = builder.header(name, value);
            }
        }
        if let Some(body_b64) = &request.body_b64 {
            match base64::engine::general_purpose::STANDARD.decode(body_b64) {
                Ok(bytes) => builder = builder.body(bytes),
                Err(_) => {
                    self.push_error_head(&peer, &stream_id, 400).await;
                    return;
                }
            }
        }

        let response = tokio::select! {
            r = builder.send() => r,
            _ = cancel.cancelled() => return,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%url, error = %e, "tunnel upstream request failed");
                self.push_error_head(&peer, &stream_id, 502).await;
                return;
            }
        };

        let status = response.status().as_u16();
        let headers = filter_headers(
            response
                .headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        );

        let head = ProxyChunkPush {
            stream_id: stream_id.clone(),
            chunk_b64: None,
            is_final: false,
            status: Some(status),
            headers: Some(headers),
        };
        if self.push_chunk(&peer, head).await.is_err() {
            return;
        }

        let mut body = response.bytes_stream();
        loop {
            let next = tokio::select! {
                n = body.next() => n,
                _ = cancel.cancelled() => {
                    tracing::debug!(stream = %stream_id, "tunnel stream cancelled by requester");
                    return;
                }
            };
            match next {
                Some(Ok(bytes)) => {
                    let chunk = ProxyChunkPush {
                        stream_id: stream_id.clone(),
                        chunk_b64: Some(
                            base64::engine::general_purpose::STANDARD.encode(&bytes),
                        ),
                        is_final: false,
                        status: None,
                        headers: None,
                    };
                    if self.push_chunk(&peer, chunk).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(stream = %stream_id, error = %e, "tunnel upstream read failed");
                    break;
                }
                None => break,
            }
        }

        let fin = ProxyChunkPush {
            stream_id,
            chunk_b64: None,
            is_final: true,
            status: None,
            headers: None,
        };
        let _ = self.push_chunk(&peer, fin).await;
    }

    async fn push_chunk(&self, peer: &PeerName, chunk: ProxyChunkPush) -> Result<(), ()> {
        let payload = serde_json::to_value(&chunk).map_err(|_| ())?;
        self.channels
            .push_reliable(peer, method::PROXY_CHUNK, payload)
            .await
            .map_err(|_| ())
    }

    async fn push_error_head(&self, peer: &PeerName, stream_id: &str, status: u16) {
        let chunk = ProxyChunkPush {
            stream_id: stream_id.to_string(),
            chunk_b64: None,
            is_final: true,
            status: Some(status),
            headers: Some(BTreeMap::new()),
        };
        let _ = self.push_chunk(peer, chunk).await;
    }
}

/// Fetch a local pod directly — the app executes on this agent, so the
/// tunnel has no peer hop.
pub async fn proxy_local(
    executor: &Arc<Executor>,
    http: &reqwest::Client,
    id: &AppId,
    port: u16,
    http_method: &str,
    path: &str,
    query: Option<&str>,
    headers: &BTreeMap<String, String>,
    body: Vec<u8>,
) -> Result<reqwest::Response, TunnelError> {
    let ip = executor
        .ready_pod_ip(id)
        .await
        .map_err(|e| TunnelError::Upstream(e.to_string()))?;
    let url = match query {
        Some(q) if !q.is_empty() => format!("http://{ip}:{port}{path}?{q}"),
        _ => format!("http://{ip}:{port}{path}"),
    };
    let http_method = reqwest::Method::from_bytes(http_method.as_bytes())
        .map_err(|e| TunnelError::Upstream(e.to_string()))?;
    let mut builder = http.request(http_method, &url).timeout(TOTAL_TIMEOUT);
    for (name, value) in headers {
        if !is_hop_header(name) {
            builder = builder.header(name, value);
        }
    }
    if !body.is_empty() {
        builder = builder.body(body);
    }
    builder.send().await.map_err(|e| TunnelError::Upstream(e.to_string()))
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
