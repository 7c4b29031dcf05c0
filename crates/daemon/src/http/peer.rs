// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer-facing surface: `POST /peer` (handshake) and `GET /ws` (channel).
//!
//! Channel upgrades authenticate by fingerprint: the dialer presents its
//! CA PEM base64-encoded in `X-Agent-Ca`; we hash it and look for a peer
//! pinned to that fingerprint. Intermediaries commonly strip client
//! certificates, so the pin rides an application header instead of mTLS.

use super::ApiError;
use crate::channel::Transport;
use crate::context::AgentContext;
use crate::credentials::fingerprint_pem;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use porpulsion_core::{NotificationLevel, PeerStatus};
use porpulsion_wire::HandshakeRequest;
use serde_json::json;
use std::sync::Arc;

pub fn peer_router(ctx: Arc<AgentContext>) -> Router {
    Router::new()
        .route("/peer", post(handshake))
        .route("/ws", get(channel_upgrade))
        .with_state(ctx)
}

async fn handshake(
    State(ctx): State<Arc<AgentContext>>,
    Json(request): Json<HandshakeRequest>,
) -> Response {
    match ctx.handshake.handle_inbound(&request) {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => {
            let _ = ctx.registry.notify(
                NotificationLevel::Warn,
                "handshake rejected",
                format!("inbound handshake from {:?} failed: {e}", request.name),
            );
            let api = ApiError::from_handshake(e);
            (api.status, Json(json!({"error": api.error, "kind": api.kind}))).into_response()
        }
    }
}

async fn channel_upgrade(
    State(ctx): State<Arc<AgentContext>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // Authenticate before upgrading: the presented CA must hash to a
    // pinned fingerprint.
    let presented = match headers.get("X-Agent-Ca").and_then(|v| v.to_str().ok()) {
        Some(value) => value,
        None => return unauthorized("missing X-Agent-Ca header"),
    };
    let pem_bytes = match base64::engine::general_purpose::STANDARD.decode(presented) {
        Ok(bytes) => bytes,
        Err(_) => return unauthorized("X-Agent-Ca is not valid base64"),
    };
    let pem = match String::from_utf8(pem_bytes) {
        Ok(pem) => pem,
        Err(_) => return unauthorized("X-Agent-Ca is not UTF-8"),
    };
    let fingerprint = match fingerprint_pem(&pem) {
        Ok(fp) => fp,
        Err(_) => return unauthorized("X-Agent-Ca is not a certificate"),
    };
    let Some(peer) = ctx.registry.peer_by_fingerprint(&fingerprint) else {
        tracing::warn!(%fingerprint, "channel upgrade from unknown CA rejected");
        let _ = ctx.registry.notify(
            NotificationLevel::Warn,
            "channel rejected",
            format!("upgrade with unknown CA fingerprint {fingerprint}"),
        );
        return unauthorized("unknown CA");
    };

    let name = peer.name.clone();
    ws.on_upgrade(move |socket| async move {
        tracing::info!(peer = %name, "inbound channel authenticated");
        let transport = Transport::from_axum(socket);
        ctx.channels.attach(&name, transport);
        let _ = ctx.registry.set_peer_status(&name, PeerStatus::Connected, None);
        // Make sure a dialer exists so we reconnect if this drops.
        if let Some(record) = ctx.registry.peer(&name) {
            ctx.channels.ensure_peer(&record);
        }
    })
}

fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": reason, "kind": "trust"})),
    )
        .into_response()
}
