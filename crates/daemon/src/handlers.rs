// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed channel handlers — the executor-facing half of the router.
//!
//! Admission rejections travel as `accepted: false` replies (the request
//! itself succeeded); only malformed payloads and internal failures
//! become error replies.

use crate::admission::{self, Admitted};
use crate::context::AgentContext;
use crate::router::MessageRouter;
use crate::tunnel::TunnelServer;
use porpulsion_core::{
    AppStatus, NotificationLevel, PendingApproval, RemoteApp,
};
use porpulsion_wire::{
    method, CancelPush, CreateAppReply, CreateAppRequest, DeleteAppRequest, LogsReply,
    LogsRequest, PingReply, ProxyChunkPush, ProxyHttpRequest, SpecUpdateRequest, StatusPush,
};
use serde_json::json;
use std::sync::Arc;

/// Wire every registered method and event to its handler.
pub fn build_router(ctx: Arc<AgentContext>, tunnel: Arc<TunnelServer>) -> MessageRouter {
    let mut router = MessageRouter::new();

    router.on_request(method::PEER_PING, |_peer, _payload| async {
        MessageRouter::encode(&PingReply { pong: true })
    });

    let create_ctx = Arc::clone(&ctx);
    router.on_request(method::REMOTEAPP_CREATE, move |peer, payload| {
        let ctx = Arc::clone(&create_ctx);
        async move {
            let request: CreateAppRequest = MessageRouter::decode(payload)?;
            request.spec.validate().map_err(|e| format!("validation: {e}"))?;

            let settings = ctx.registry.settings();
            let totals =
                admission::current_totals(&ctx.registry.executing(), Some(&request.id));
            match admission::admit(&settings, &peer, &request.spec, &totals) {
                Err(rejection) => {
                    let reason = rejection.to_string();
                    let _ = ctx.registry.notify(
                        NotificationLevel::Info,
                        "remoteapp rejected",
                        format!("{peer} submitted {}: {reason}", request.name),
                    );
                    MessageRouter::encode(&CreateAppReply {
                        accepted: false,
                        reason: Some(reason),
                        pending_approval: false,
                    })
                }
                Ok(Admitted::QueueForApproval) => {
                    ctx.registry
                        .enqueue_approval(PendingApproval {
                            id: request.id.clone(),
                            name: request.name.clone(),
                            source_peer: peer.clone(),
                            spec: request.spec,
                            arrived_at: chrono::Utc::now(),
                        })
                        .map_err(|e| e.to_string())?;
                    let _ = ctx.registry.notify(
                        NotificationLevel::Info,
                        "approval required",
                        format!("{peer} submitted {} for approval", request.name),
                    );
                    MessageRouter::encode(&CreateAppReply {
                        accepted: true,
                        reason: None,
                        pending_approval: true,
                    })
                }
                Ok(Admitted::Execute) => {
                    let mut app = RemoteApp::executing(
                        request.id.clone(),
                        request.name,
                        request.spec,
                        peer.clone(),
                    );
                    app.set_status(AppStatus::Pending, None);
                    ctx.registry.insert_executing(app.clone());

                    let apply_ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        let id = app.id.clone();
                        match apply_ctx.executor.apply(&app).await {
                            Ok(()) => {
                                let _ = apply_ctx.registry.update_executing(&id, |a| {
                                    a.set_status(AppStatus::Creating, None)
                                });
                            }
                            Err(e) => {
                                let message = e.to_string();
                                tracing::warn!(app = %id, error = %message, "apply failed");
                                let _ = apply_ctx.registry.update_executing(&id, |a| {
                                    a.set_status(AppStatus::Failed, Some(message.clone()))
                                });
                            }
                        }
                        apply_ctx.push_status(&peer, &id);
                        apply_ctx.reconcile_wake.notify_one();
                    });

                    MessageRouter::encode(&CreateAppReply {
                        accepted: true,
                        reason: None,
                        pending_approval: false,
                    })
                }
            }
        }
    });

    let delete_ctx = Arc::clone(&ctx);
    router.on_request(method::REMOTEAPP_DELETE, move |_peer, payload| {
        let ctx = Arc::clone(&delete_ctx);
        async move {
            let request: DeleteAppRequest = MessageRouter::decode(payload)?;
            // Idempotent: success whether or not anything exists.
            ctx.executor.delete(&request.id).await.map_err(|e| e.to_string())?;
            ctx.registry.remove_executing(&request.id);
            let _ = ctx.registry.take_approval(&request.id).map_err(|e| e.to_string())?;
            ctx.executor.forget(&request.id);
            MessageRouter::encode(&json!({}))
        }
    });

    let spec_ctx = Arc::clone(&ctx);
    router.on_request(method::REMOTEAPP_SPEC, move |peer, payload| {
        let ctx = Arc::clone(&spec_ctx);
        async move {
            let request: SpecUpdateRequest = MessageRouter::decode(payload)?;
            request.spec.validate().map_err(|e| format!("validation: {e}"))?;

            let Some(app) = ctx.registry.app(&request.id) else {
                return Err("app_not_found".to_string());
            };
            if app.source_peer.as_ref() != Some(&peer) {
                return Err("app_not_found".to_string());
            }

            let settings = ctx.registry.settings();
            let totals =
                admission::current_totals(&ctx.registry.executing(), Some(&request.id));
            match admission::admit(&settings, &peer, &request.spec, &totals) {
                Err(rejection) => MessageRouter::encode(&CreateAppReply {
                    accepted: false,
                    reason: Some(rejection.to_string()),
                    pending_approval: false,
                }),
                Ok(_) => {
                    let updated = ctx
                        .registry
                        .update_executing(&request.id, |a| {
                            a.spec = request.spec.clone();
                            a.set_status(AppStatus::Creating, Some("spec updated".to_string()));
                        })
                        .map_err(|e| e.to_string())?;

                    let apply_ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        let id = updated.id.clone();
                        if let Err(e) = apply_ctx.executor.apply(&updated).await {
                            let message = e.to_string();
                            let _ = apply_ctx.registry.update_executing(&id, |a| {
                                a.set_status(AppStatus::Failed, Some(message.clone()))
                            });
                        }
                        apply_ctx.push_status(&peer, &id);
                        apply_ctx.reconcile_wake.notify_one();
                    });

                    MessageRouter::encode(&CreateAppReply {
                        accepted: true,
                        reason: None,
                        pending_approval: false,
                    })
                }
            }
        }
    });

    let logs_ctx = Arc::clone(&ctx);
    router.on_request(method::REMOTEAPP_LOGS, move |peer, payload| {
        let ctx = Arc::clone(&logs_ctx);
        async move {
            let request: LogsRequest = MessageRouter::decode(payload)?;
            let Some(app) = ctx.registry.app(&request.id) else {
                return Err("app_not_found".to_string());
            };
            if app.source_peer.as_ref() != Some(&peer) {
                return Err("app_not_found".to_string());
            }
            let lines = ctx
                .executor
                .logs(&request.id, request.tail, request.order)
                .await
                .map_err(|e| e.to_string())?;
            MessageRouter::encode(&LogsReply { lines })
        }
    });

    let proxy_tunnel = Arc::clone(&tunnel);
    router.on_request(method::PROXY_HTTP, move |peer, payload| {
        let tunnel = Arc::clone(&proxy_tunnel);
        async move {
            let request: ProxyHttpRequest = MessageRouter::decode(payload)?;
            tunnel.handle(peer, request).await
        }
    });

    // ── Pushes ───────────────────────────────────────────────────────────

    let status_ctx = Arc::clone(&ctx);
    router.on_push(method::REMOTEAPP_STATUS, move |peer, payload| {
        let ctx = Arc::clone(&status_ctx);
        async move {
            let push: StatusPush = match MessageRouter::decode(payload) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "malformed status push dropped");
                    return;
                }
            };
            let Some(app) = ctx.registry.app(&push.id) else {
                tracing::debug!(app = %push.id, "status push for unknown app dropped");
                return;
            };
            if app.target_peer.as_ref() != Some(&peer) {
                tracing::warn!(app = %push.id, peer = %peer, "status push from wrong peer dropped");
                return;
            }
            let _ = ctx.registry.update_submitted(&push.id, |a| {
                a.set_status(push.status, push.message.clone());
            });
        }
    });

    let goodbye_ctx = Arc::clone(&ctx);
    router.on_push(method::PEER_GOODBYE, move |peer, _payload| {
        let ctx = Arc::clone(&goodbye_ctx);
        async move {
            tracing::info!(peer = %peer, "peer said goodbye, closing channel");
            ctx.channels.close_channel(&peer);
        }
    });

    let chunk_ctx = Arc::clone(&ctx);
    router.on_push(method::PROXY_CHUNK, move |_peer, payload| {
        let ctx = Arc::clone(&chunk_ctx);
        async move {
            match MessageRouter::decode::<ProxyChunkPush>(payload) {
                Ok(chunk) => ctx.tunnel_streams.deliver(chunk).await,
                Err(e) => tracing::warn!(error = %e, "malformed proxy chunk dropped"),
            }
        }
    });

    let cancel_tunnel = Arc::clone(&tunnel);
    router.on_push(method::PROXY_CANCEL, move |_peer, payload| {
        let tunnel = Arc::clone(&cancel_tunnel);
        async move {
            if let Ok(push) = MessageRouter::decode::<CancelPush>(payload) {
                tunnel.cancel_stream(&push.id);
            }
        }
    });

    router.on_push(method::CANCEL, |peer, payload| async move {
        // Request-level cancellation is advisory; committed side effects
        // are not rolled back.
        if let Ok(push) = MessageRouter::decode::<CancelPush>(payload) {
            tracing::debug!(peer = %peer, request = %push.id, "peer cancelled request");
        }
    });

    router
}
