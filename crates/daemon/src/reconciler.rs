// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciler: the periodic sweep that converges registry state with
//! Kubernetes reality.
//!
//! Every tick (or explicit wake) it rebuilds executing apps from labelled
//! Deployments, drives the status state machine, re-emits status pushes
//! that failed while a channel was down, and re-sends deletes that were
//! durably deferred. Errors never leave a record permanently inconsistent
//! with its Deployment — the next sweep tries again.

use crate::context::AgentContext;
use crate::executor::{app_from_deployment, map_status, APP_ID_LABEL};
use porpulsion_core::{AppId, AppStatus, ChannelStatus};
use porpulsion_wire::{method, DeleteAppRequest};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Reconciler {
    ctx: Arc<AgentContext>,
}

impl Reconciler {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    /// Run until shutdown: sweep every interval and on explicit wake.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval = crate::env::reconcile_interval();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.ctx.reconcile_wake.notified() => {}
                    _ = shutdown.cancelled() => return,
                }
                self.sweep().await;
            }
        })
    }

    /// One reconciliation pass.
    pub async fn sweep(&self) {
        self.reconcile_executing().await;
        self.flush_dirty_statuses();
        self.retry_deferred_deletes().await;
    }

    /// Merge labelled Deployments with in-memory executing records:
    /// reconstruct records for unknown deployments (agent restart), drive
    /// the status machine for known ones, mark records whose Deployment
    /// vanished as deleted.
    async fn reconcile_executing(&self) {
        let deployments = match self.ctx.executor.list_managed().await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "reconcile: deployment list failed");
                return;
            }
        };

        let mut by_id = HashMap::new();
        for deployment in &deployments {
            let Some(id) = deployment
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(APP_ID_LABEL))
            else {
                continue;
            };
            by_id.insert(AppId::new(id.clone()), deployment);
        }

        let known: HashSet<AppId> =
            self.ctx.registry.executing().iter().map(|a| a.id.clone()).collect();

        // Deployments without a record: reconstruct (e.g. after restart).
        for (id, deployment) in &by_id {
            if known.contains(id) {
                continue;
            }
            let Some(app) = app_from_deployment(deployment) else {
                tracing::warn!(app = %id, "labelled deployment is missing its spec annotation");
                continue;
            };
            tracing::info!(app = %id, "reconstructed executing app from deployment");
            self.ctx.registry.insert_executing(app);
        }

        // Drive the status machine for every executing record.
        for app in self.ctx.registry.executing() {
            let source = app.source_peer.clone();
            match by_id.get(&app.id) {
                Some(deployment) => {
                    let pods = match self.ctx.executor.pods_for(&app.id).await {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(app = %app.id, error = %e, "reconcile: pod list failed");
                            continue;
                        }
                    };
                    let now = chrono::Utc::now();
                    let (status, message) =
                        map_status(&app, deployment, &pods, app.updated_at, now);
                    // A Failed/Timeout verdict sticks until the Deployment
                    // shows real progress; recomputing Creating right after
                    // the transition is not evidence of recovery.
                    if matches!(app.status, AppStatus::Failed | AppStatus::Timeout)
                        && status == AppStatus::Creating
                    {
                        continue;
                    }
                    if status != app.status || message != app.message {
                        tracing::info!(app = %app.id, from = %app.status, to = %status, "status transition");
                        let _ = self.ctx.registry.update_executing(&app.id, |a| {
                            a.set_status(status, message.clone());
                        });
                        if let Some(peer) = &source {
                            self.ctx.push_status(peer, &app.id);
                        }
                    }
                }
                None => {
                    // Deployment is gone: the app is deleted, whatever we
                    // thought its status was.
                    if app.status != AppStatus::Deleted {
                        tracing::info!(app = %app.id, "deployment gone, marking deleted");
                        let _ = self.ctx.registry.update_executing(&app.id, |a| {
                            a.set_status(AppStatus::Deleted, None);
                        });
                        if let Some(peer) = &source {
                            self.ctx.push_status(peer, &app.id);
                        }
                    }
                    self.ctx.registry.remove_executing(&app.id);
                    self.ctx.executor.forget(&app.id);
                }
            }
        }
    }

    /// Re-emit the current status of records whose last push failed with
    /// a dead channel.
    fn flush_dirty_statuses(&self) {
        for app in self.ctx.registry.executing() {
            if !app.status_dirty {
                continue;
            }
            let Some(peer) = app.source_peer.clone() else { continue };
            if self.ctx.channels.channel_status(&peer) == ChannelStatus::Connected {
                tracing::info!(app = %app.id, peer = %peer, "re-emitting deferred status");
                self.ctx.push_status(&peer, &app.id);
            }
        }
    }

    /// Deletes issued while the channel was down are durably marked;
    /// re-send them once the peer is reachable.
    async fn retry_deferred_deletes(&self) {
        for app in self.ctx.registry.submitted() {
            if !app.delete_pending {
                continue;
            }
            let Some(peer) = app.target_peer.clone() else { continue };
            if self.ctx.channels.channel_status(&peer) != ChannelStatus::Connected {
                continue;
            }
            let Ok(payload) = serde_json::to_value(DeleteAppRequest { id: app.id.clone() })
            else {
                continue;
            };
            match self.ctx.channels.send(&peer, method::REMOTEAPP_DELETE, payload).await {
                Ok(_) => {
                    tracing::info!(app = %app.id, peer = %peer, "deferred delete delivered");
                    let _ = self.ctx.registry.remove_submitted(&app.id);
                }
                Err(e) => {
                    tracing::debug!(app = %app.id, peer = %peer, error = %e, "deferred delete still failing");
                }
            }
        }
    }
}
