// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent context: every component wired together at startup.
//!
//! Dashboard-facing operations live here so the REST layer stays a thin
//! shim. The submit path is transactional toward the peer: the request is
//! sent first and the submitted record persisted only once the executor
//! has accepted it, so a dead channel leaves no local state behind.

use crate::channel::{ChannelError, ChannelManager};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::executor::Executor;
use crate::handshake::{HandshakeError, HandshakeService};
use crate::tunnel::TunnelStreams;
use porpulsion_core::{
    AppId, AppOrigin, AppSpec, AppStatus, NotificationLevel, PendingApproval, PeerName, RemoteApp,
};
use porpulsion_storage::{RegistryError, StateRegistry};
use porpulsion_wire::{
    method, CreateAppReply, CreateAppRequest, DeleteAppRequest, LogOrder, LogsReply, LogsRequest,
    SpecUpdateRequest,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

/// Operation failures, mapped onto HTTP statuses by the REST layer.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Admission(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Transport(#[from] ChannelError),
    #[error(transparent)]
    Trust(#[from] HandshakeError),
    #[error("{0}")]
    Internal(String),
}

impl From<RegistryError> for OpError {
    fn from(e: RegistryError) -> Self {
        OpError::Internal(e.to_string())
    }
}

pub struct AgentContext {
    pub config: Config,
    pub registry: Arc<StateRegistry>,
    pub credentials: Arc<CredentialStore>,
    pub channels: Arc<ChannelManager>,
    pub executor: Arc<Executor>,
    pub handshake: Arc<HandshakeService>,
    pub tunnel_streams: Arc<TunnelStreams>,
    pub http: reqwest::Client,
    /// Wakes the reconciler for an immediate sweep.
    pub reconcile_wake: Arc<Notify>,
}

impl AgentContext {
    // ── Submitted apps ───────────────────────────────────────────────────

    /// Submit a workload to a peer. Atomic toward the channel: persist
    /// only on an accepted reply.
    pub async fn submit_app(
        &self,
        name: &str,
        spec: AppSpec,
        target_peer: &PeerName,
    ) -> Result<RemoteApp, OpError> {
        spec.validate().map_err(|e| OpError::Validation(e.to_string()))?;
        if self.registry.peer(target_peer).is_none() {
            return Err(OpError::NotFound(format!("unknown peer {target_peer}")));
        }

        let id = AppId::new(uuid::Uuid::new_v4().simple().to_string());
        let request = CreateAppRequest { id: id.clone(), name: name.to_string(), spec: spec.clone() };
        let payload = serde_json::to_value(&request)
            .map_err(|e| OpError::Internal(e.to_string()))?;

        let reply = self.channels.send(target_peer, method::REMOTEAPP_CREATE, payload).await?;
        let reply: CreateAppReply = serde_json::from_value(reply)
            .map_err(|e| OpError::Internal(format!("malformed create reply: {e}")))?;

        let mut app = RemoteApp::submitted(id, name, spec, target_peer.clone());
        if reply.accepted {
            if reply.pending_approval {
                app.set_status(
                    AppStatus::Pending,
                    Some(format!("awaiting approval on {target_peer}")),
                );
            }
            self.registry.insert_submitted(app.clone())?;
            Ok(app)
        } else {
            let reason = reply.reason.unwrap_or_else(|| "rejected".to_string());
            app.set_status(AppStatus::Failed, Some(reason.clone()));
            self.registry.insert_submitted(app)?;
            let _ = self.registry.notify(
                NotificationLevel::Info,
                "remoteapp rejected",
                format!("{target_peer} rejected {name}: {reason}"),
            );
            Err(OpError::Admission(reason))
        }
    }

    /// Delete an app on both sides. A dead channel durably marks the
    /// delete; the reconciler re-sends it on reconnect — never dropped.
    pub async fn delete_app(&self, id: &AppId) -> Result<(), OpError> {
        let app = self
            .registry
            .app(id)
            .ok_or_else(|| OpError::NotFound(format!("unknown app {id}")))?;

        match app.origin {
            AppOrigin::Submitted => {
                let target = app
                    .target_peer
                    .clone()
                    .ok_or_else(|| OpError::Internal("submitted app without target".to_string()))?;
                let payload = serde_json::to_value(DeleteAppRequest { id: id.clone() })
                    .map_err(|e| OpError::Internal(e.to_string()))?;
                match self.channels.send(&target, method::REMOTEAPP_DELETE, payload).await {
                    Ok(_) => {
                        self.registry.remove_submitted(id)?;
                        Ok(())
                    }
                    Err(ChannelError::Down) | Err(ChannelError::Timeout) => {
                        self.registry.update_submitted(id, |a| {
                            a.set_status(AppStatus::Deleted, Some("delete pending".to_string()));
                            a.delete_pending = true;
                        })?;
                        self.reconcile_wake.notify_one();
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            AppOrigin::Executing => {
                self.executor
                    .delete(id)
                    .await
                    .map_err(|e| OpError::Internal(e.to_string()))?;
                self.registry.remove_executing(id);
                self.executor.forget(id);
                Ok(())
            }
        }
    }

    /// Replace the spec of a submitted app and re-apply remotely.
    pub async fn update_spec(&self, id: &AppId, spec: AppSpec) -> Result<RemoteApp, OpError> {
        spec.validate().map_err(|e| OpError::Validation(e.to_string()))?;
        let app = self
            .registry
            .app(id)
            .ok_or_else(|| OpError::NotFound(format!("unknown app {id}")))?;
        if app.origin != AppOrigin::Submitted {
            return Err(OpError::Validation(
                "spec updates apply to submitted apps only".to_string(),
            ));
        }
        let target = app
            .target_peer
            .clone()
            .ok_or_else(|| OpError::Internal("submitted app without target".to_string()))?;

        let payload =
            serde_json::to_value(SpecUpdateRequest { id: id.clone(), spec: spec.clone() })
                .map_err(|e| OpError::Internal(e.to_string()))?;
        let reply = self.channels.send(&target, method::REMOTEAPP_SPEC, payload).await?;
        let reply: CreateAppReply = serde_json::from_value(reply)
            .map_err(|e| OpError::Internal(format!("malformed spec reply: {e}")))?;

        if !reply.accepted {
            let reason = reply.reason.unwrap_or_else(|| "rejected".to_string());
            return Err(OpError::Admission(reason));
        }
        Ok(self.registry.update_submitted(id, |a| {
            a.spec = spec.clone();
            a.updated_at = chrono::Utc::now();
        })?)
    }

    /// Scale is a spec update touching only `replicas`.
    pub async fn scale_app(&self, id: &AppId, replicas: i32) -> Result<RemoteApp, OpError> {
        let app = self
            .registry
            .app(id)
            .ok_or_else(|| OpError::NotFound(format!("unknown app {id}")))?;
        let mut spec = app.spec.clone();
        spec.replicas = replicas;
        self.update_spec(id, spec).await
    }

    /// Fetch logs for an app, crossing the channel for submitted apps.
    pub async fn app_logs(
        &self,
        id: &AppId,
        tail: i64,
        order: LogOrder,
    ) -> Result<LogsReply, OpError> {
        let app = self
            .registry
            .app(id)
            .ok_or_else(|| OpError::NotFound(format!("unknown app {id}")))?;
        match app.origin {
            AppOrigin::Submitted => {
                let target = app
                    .target_peer
                    .clone()
                    .ok_or_else(|| OpError::Internal("submitted app without target".to_string()))?;
                let payload =
                    serde_json::to_value(LogsRequest { id: id.clone(), tail, order })
                        .map_err(|e| OpError::Internal(e.to_string()))?;
                let reply = self.channels.send(&target, method::REMOTEAPP_LOGS, payload).await?;
                serde_json::from_value(reply)
                    .map_err(|e| OpError::Internal(format!("malformed logs reply: {e}")))
            }
            AppOrigin::Executing => {
                let lines = self
                    .executor
                    .logs(id, tail, order)
                    .await
                    .map_err(|e| OpError::Internal(e.to_string()))?;
                Ok(LogsReply { lines })
            }
        }
    }

    // ── Inbound approvals ────────────────────────────────────────────────

    /// Operator approves a queued inbound app: run the executor path.
    pub async fn approve_app(&self, id: &AppId) -> Result<(), OpError> {
        let approval: PendingApproval = self
            .registry
            .take_approval(id)?
            .ok_or_else(|| OpError::NotFound(format!("no pending approval {id}")))?;

        let mut app = RemoteApp::executing(
            approval.id.clone(),
            approval.name.clone(),
            approval.spec,
            approval.source_peer.clone(),
        );
        app.set_status(AppStatus::Approved, None);
        self.registry.insert_executing(app.clone());

        if let Err(e) = self.executor.apply(&app).await {
            let message = e.to_string();
            let _ = self.registry.update_executing(id, |a| {
                a.set_status(AppStatus::Failed, Some(message.clone()));
            });
            self.push_status(&approval.source_peer, id);
            return Err(OpError::Internal(message));
        }
        let _ = self.registry.update_executing(id, |a| {
            a.set_status(AppStatus::Creating, None);
        });
        self.push_status(&approval.source_peer, id);
        self.reconcile_wake.notify_one();
        Ok(())
    }

    /// Operator rejects a queued inbound app.
    pub fn reject_app(&self, id: &AppId) -> Result<(), OpError> {
        let approval = self
            .registry
            .take_approval(id)?
            .ok_or_else(|| OpError::NotFound(format!("no pending approval {id}")))?;
        let _ = self.channels.push(
            &approval.source_peer,
            method::REMOTEAPP_STATUS,
            json!({"id": id, "status": AppStatus::Rejected, "message": "rejected by operator"}),
        );
        Ok(())
    }

    // ── Peers ────────────────────────────────────────────────────────────

    /// Remove a peer: channel, record, and our submitted apps targeting it.
    pub async fn remove_peer(&self, name: &PeerName) -> Result<(), OpError> {
        if self.registry.peer(name).is_none() {
            return Err(OpError::NotFound(format!("unknown peer {name}")));
        }
        // Best-effort teardown of apps we submitted to this peer.
        for app in self.registry.submitted() {
            if app.target_peer.as_ref() == Some(name) {
                let payload = serde_json::to_value(DeleteAppRequest { id: app.id.clone() })
                    .map_err(|e| OpError::Internal(e.to_string()))?;
                let _ = self.channels.send(name, method::REMOTEAPP_DELETE, payload).await;
                self.registry.remove_submitted(&app.id)?;
            }
        }
        self.channels.remove_peer(name);
        self.registry.remove_peer(name)?;
        Ok(())
    }

    /// Push the current status of an executing app to its source peer,
    /// marking the record dirty when the channel is down so the
    /// reconciler re-emits it later.
    pub fn push_status(&self, peer: &PeerName, id: &AppId) {
        let Some(app) = self.registry.app(id) else { return };
        let payload = json!({
            "id": app.id,
            "status": app.status,
            "message": app.message,
        });
        match self.channels.push(peer, method::REMOTEAPP_STATUS, payload) {
            Ok(()) => {
                let _ = self.registry.update_executing(id, |a| a.status_dirty = false);
            }
            Err(ChannelError::Down) => {
                tracing::debug!(app = %id, peer = %peer, "status push deferred, channel down");
                let _ = self.registry.update_executing(id, |a| a.status_dirty = true);
            }
            Err(e) => {
                tracing::warn!(app = %id, peer = %peer, error = %e, "status push failed");
            }
        }
    }
}
