// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local dashboard API under `/api`.

use super::ApiError;
use crate::context::AgentContext;
use crate::tunnel::{self, TunnelError};
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, get, post, put};
use axum::{Json, Router};
use porpulsion_core::{AppId, AppOrigin, NotificationLevel, PeerName, PeerStatus};
use porpulsion_wire::LogOrder;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

pub fn dashboard_router(ctx: Arc<AgentContext>) -> Router {
    Router::new()
        .route("/api/token", get(token))
        .route("/api/peers", get(list_peers))
        .route("/api/peers/connect", post(connect_peer))
        .route("/api/peers/:name", delete(remove_peer))
        .route("/api/peers/inbound", get(inbound_peers))
        .route("/api/peers/inbound/:name/accept", post(accept_inbound))
        .route("/api/peers/inbound/:name", delete(reject_inbound))
        .route("/api/remoteapps", get(list_apps))
        .route("/api/remoteapp", post(submit_app))
        .route("/api/remoteapp/:id/detail", get(app_detail))
        .route("/api/remoteapp/:id/spec", put(update_spec))
        .route("/api/remoteapp/:id/scale", post(scale_app))
        .route("/api/remoteapp/:id", delete(delete_app))
        .route("/api/remoteapp/:id/approve", post(approve_app))
        .route("/api/remoteapp/:id/reject", post(reject_app))
        .route("/api/remoteapp/:id/logs", get(app_logs))
        .route("/api/remoteapp/:id/proxy/:port/", any(proxy))
        .route("/api/remoteapp/:id/proxy/:port/*rest", any(proxy))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/notifications", get(list_notifications).delete(clear_notifications))
        .route("/api/notifications/:id/ack", post(ack_notification))
        .with_state(ctx)
}

// ── Token ─────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct TokenQuery {
    #[serde(default)]
    rotate: bool,
}

async fn token(
    State(ctx): State<Arc<AgentContext>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.rotate {
        ctx.credentials.rotate_invite().map_err(|e| ApiError::internal(e.to_string()))?;
    }
    Ok(Json(json!({
        "invite_token": ctx.credentials.invite_token(),
        "ca_pem": ctx.credentials.ca_pem(),
        "fingerprint": ctx.credentials.fingerprint(),
        "self_url": ctx.config.self_url,
    })))
}

// ── Peers ─────────────────────────────────────────────────────────────────

fn peer_json(ctx: &AgentContext, peer: &porpulsion_core::Peer) -> Value {
    json!({
        "name": peer.name,
        "url": peer.url,
        "status": peer.status,
        "channel": ctx.channels.channel_status(&peer.name),
        "ca_fingerprint": peer.ca_fingerprint,
        "connected_at": peer.connected_at,
        "last_error": peer.last_error,
    })
}

async fn list_peers(State(ctx): State<Arc<AgentContext>>) -> Json<Value> {
    let peers: Vec<Value> =
        ctx.registry.peers().iter().map(|p| peer_json(&ctx, p)).collect();
    Json(json!({"peers": peers, "generation": ctx.registry.generation()}))
}

#[derive(Deserialize)]
struct ConnectRequest {
    name: String,
    url: String,
    invite_token: String,
    expected_fingerprint: String,
}

async fn connect_peer(
    State(ctx): State<Arc<AgentContext>>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = PeerName::new(request.name);
    match ctx
        .handshake
        .initiate(&name, &request.url, &request.invite_token, &request.expected_fingerprint)
        .await
    {
        Ok(peer) => Ok(Json(peer_json(&ctx, &peer))),
        Err(e) => {
            let _ = ctx.registry.notify(
                NotificationLevel::Warn,
                "handshake failed",
                format!("peering with {} failed: {e}", request.url),
            );
            Err(ApiError::from_handshake(e))
        }
    }
}

async fn remove_peer(
    State(ctx): State<Arc<AgentContext>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.remove_peer(&PeerName::new(name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn inbound_peers(State(ctx): State<Arc<AgentContext>>) -> Json<Value> {
    let pending: Vec<Value> = ctx
        .registry
        .peers()
        .iter()
        .filter(|p| p.status == PeerStatus::AwaitingConfirmation)
        .map(|p| peer_json(&ctx, p))
        .collect();
    Json(json!({"pending": pending}))
}

async fn accept_inbound(
    State(ctx): State<Arc<AgentContext>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let name = PeerName::new(name);
    let peer = ctx
        .registry
        .peer(&name)
        .ok_or_else(|| ApiError::not_found(format!("unknown peer {name}")))?;
    if peer.status != PeerStatus::AwaitingConfirmation {
        return Err(ApiError::validation(format!("peer {name} is not awaiting confirmation")));
    }
    let status = if ctx.channels.is_connected(&name) {
        PeerStatus::Connected
    } else {
        PeerStatus::Connecting
    };
    let updated = ctx
        .registry
        .set_peer_status(&name, status, None)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(peer_json(&ctx, &updated)))
}

async fn reject_inbound(
    State(ctx): State<Arc<AgentContext>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let name = PeerName::new(name);
    let peer = ctx
        .registry
        .peer(&name)
        .ok_or_else(|| ApiError::not_found(format!("unknown peer {name}")))?;
    if peer.status != PeerStatus::AwaitingConfirmation {
        return Err(ApiError::validation(format!("peer {name} is not awaiting confirmation")));
    }
    ctx.channels.remove_peer(&name);
    ctx.registry.remove_peer(&name).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Remote apps ───────────────────────────────────────────────────────────

async fn list_apps(State(ctx): State<Arc<AgentContext>>) -> Json<Value> {
    Json(json!({
        "submitted": ctx.registry.submitted(),
        "executing": ctx.registry.executing(),
        "pending_approval": ctx.registry.approvals(),
        "generation": ctx.registry.generation(),
    }))
}

#[derive(Deserialize)]
struct SubmitRequest {
    name: String,
    spec: Value,
    target_peer: Option<String>,
}

async fn submit_app(
    State(ctx): State<Arc<AgentContext>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<Value>, ApiError> {
    let spec = serde_json::from_value(request.spec)
        .map_err(|e| ApiError::validation(format!("invalid spec: {e}")))?;
    let target = request
        .target_peer
        .map(PeerName::new)
        .or_else(|| {
            let peers = ctx.registry.peers();
            (peers.len() == 1).then(|| peers[0].name.clone())
        })
        .ok_or_else(|| ApiError::validation("target_peer is required"))?;
    let app = ctx.submit_app(&request.name, spec, &target).await?;
    Ok(Json(serde_json::to_value(app).map_err(|e| ApiError::internal(e.to_string()))?))
}

async fn app_detail(
    State(ctx): State<Arc<AgentContext>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let app = ctx
        .registry
        .app(&AppId::new(id.clone()))
        .ok_or_else(|| ApiError::not_found(format!("unknown app {id}")))?;
    Ok(Json(serde_json::to_value(app).map_err(|e| ApiError::internal(e.to_string()))?))
}

async fn update_spec(
    State(ctx): State<Arc<AgentContext>>,
    Path(id): Path<String>,
    Json(spec): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let spec = serde_json::from_value(spec)
        .map_err(|e| ApiError::validation(format!("invalid spec: {e}")))?;
    let app = ctx.update_spec(&AppId::new(id), spec).await?;
    Ok(Json(serde_json::to_value(app).map_err(|e| ApiError::internal(e.to_string()))?))
}

#[derive(Deserialize)]
struct ScaleRequest {
    replicas: i32,
}

async fn scale_app(
    State(ctx): State<Arc<AgentContext>>,
    Path(id): Path<String>,
    Json(request): Json<ScaleRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.replicas < 0 {
        return Err(ApiError::validation("replicas must be >= 0"));
    }
    let app = ctx.scale_app(&AppId::new(id), request.replicas).await?;
    Ok(Json(serde_json::to_value(app).map_err(|e| ApiError::internal(e.to_string()))?))
}

async fn delete_app(
    State(ctx): State<Arc<AgentContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.delete_app(&AppId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_tail")]
    tail: i64,
    #[serde(default)]
    order: LogOrder,
}

fn default_tail() -> i64 {
    100
}

async fn app_logs(
    State(ctx): State<Arc<AgentContext>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let reply = ctx.app_logs(&AppId::new(id), query.tail, query.order).await?;
    Ok(Json(serde_json::to_value(reply).map_err(|e| ApiError::internal(e.to_string()))?))
}

// ── Approvals (admission UI path) ─────────────────────────────────────────

async fn approve_app(
    State(ctx): State<Arc<AgentContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.approve_app(&AppId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reject_app(
    State(ctx): State<Arc<AgentContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.reject_app(&AppId::new(id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tunnel ────────────────────────────────────────────────────────────────

async fn proxy(
    State(ctx): State<Arc<AgentContext>>,
    Path(params): Path<ProxyParams>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let id = AppId::new(params.id.clone());
    let Some(app) = ctx.registry.app(&id) else {
        return ApiError::not_found(format!("unknown app {}", params.id)).into_response();
    };

    let path = format!("/{}", params.rest.unwrap_or_default());
    let query = uri.query().map(str::to_string);
    let filtered: BTreeMap<String, String> = tunnel::filter_headers(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    );

    match app.origin {
        AppOrigin::Submitted => {
            let Some(target) = app.target_peer.clone() else {
                return ApiError::internal("submitted app without target").into_response();
            };
            let result = tunnel::proxy_over_channel(
                &ctx.channels,
                &ctx.tunnel_streams,
                &target,
                &id,
                params.port,
                method.as_str(),
                &path,
                query,
                filtered,
                body.to_vec(),
            )
            .await;
            match result {
                Ok(response) => stream_response(response),
                Err(e) => tunnel_error_response(e),
            }
        }
        AppOrigin::Executing => {
            let result = tunnel::proxy_local(
                &ctx.executor,
                &ctx.http,
                &id,
                params.port,
                method.as_str(),
                &path,
                query.as_deref(),
                &filtered,
                body.to_vec(),
            )
            .await;
            match result {
                Ok(upstream) => local_response(upstream),
                Err(e) => tunnel_error_response(e),
            }
        }
    }
}

#[derive(Deserialize)]
struct ProxyParams {
    id: String,
    port: u16,
    rest: Option<String>,
}

fn stream_response(response: tunnel::TunnelResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let stream = ReceiverStream::new(response.body);
    let body = Body::from_stream(stream);
    let mut out = Response::new(body);
    *out.status_mut() = status;
    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) =
            (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
        {
            headers.insert(name, value);
        }
    }
    out
}

fn local_response(upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = Response::new(Body::empty());
    *out.status_mut() = status;
    let headers = out.headers_mut();
    for (name, value) in upstream.headers() {
        if !tunnel::is_hop_header(name.as_str()) {
            if let (Ok(name), Ok(value)) = (
                name.as_str().parse::<HeaderName>(),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.insert(name, value);
            }
        }
    }
    *out.body_mut() = Body::from_stream(upstream.bytes_stream());
    out
}

fn tunnel_error_response(e: TunnelError) -> Response {
    let (status, kind) = match &e {
        TunnelError::Denied => (StatusCode::FORBIDDEN, "admission"),
        TunnelError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        TunnelError::Channel(_) | TunnelError::IdleTimeout | TunnelError::TotalTimeout => {
            (StatusCode::GATEWAY_TIMEOUT, "transport")
        }
        TunnelError::BadChunk(_) | TunnelError::Upstream(_) => {
            (StatusCode::BAD_GATEWAY, "transport")
        }
    };
    ApiError { status, kind, error: e.to_string() }.into_response()
}

// ── Settings ──────────────────────────────────────────────────────────────

async fn get_settings(State(ctx): State<Arc<AgentContext>>) -> Json<Value> {
    Json(json!(ctx.registry.settings()))
}

async fn update_settings(
    State(ctx): State<Arc<AgentContext>>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let merged = ctx
        .registry
        .merge_settings(&patch)
        .map_err(|e| ApiError::validation(e.to_string()))?;
    Ok(Json(json!(merged)))
}

// ── Notifications ─────────────────────────────────────────────────────────

async fn list_notifications(State(ctx): State<Arc<AgentContext>>) -> Json<Value> {
    Json(json!({"notifications": ctx.registry.notifications()}))
}

async fn ack_notification(
    State(ctx): State<Arc<AgentContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let acked = ctx
        .registry
        .ack_notification(&id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if acked {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("unknown notification {id}")))
    }
}

async fn clear_notifications(
    State(ctx): State<Arc<AgentContext>>,
) -> Result<StatusCode, ApiError> {
    ctx.registry.clear_notifications().map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
