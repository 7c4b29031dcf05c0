// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RemoteApp records and their status state machine.
//!
//! A record exists on both agents involved in a workload: the submitter
//! holds it with `origin = submitted` and a `target_peer`; the executor
//! holds it with `origin = executing` and a `source_peer`. The `id` is
//! minted by the submitter and preserved by the executor.

use crate::id::{AppId, PeerName};
use crate::spec::AppSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a remote app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppStatus {
    /// Submitted, not yet accepted by the executor (or queued for approval).
    Pending,
    Approved,
    Rejected,
    /// Deployment applied, pods not yet available.
    Creating,
    /// Some pods available, not all ready.
    Running,
    /// All replicas ready.
    Ready,
    Failed,
    /// Executor saw no progress within its startup deadline.
    Timeout,
    Deleted,
}

impl AppStatus {
    /// Terminal statuses are excluded from aggregate quota sums.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppStatus::Rejected | AppStatus::Failed | AppStatus::Timeout | AppStatus::Deleted)
    }
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Pending => "Pending",
            AppStatus::Approved => "Approved",
            AppStatus::Rejected => "Rejected",
            AppStatus::Creating => "Creating",
            AppStatus::Running => "Running",
            AppStatus::Ready => "Ready",
            AppStatus::Failed => "Failed",
            AppStatus::Timeout => "Timeout",
            AppStatus::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether this agent submitted the app or executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppOrigin {
    Submitted,
    Executing,
}

/// One unit of cross-cluster workload as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteApp {
    pub id: AppId,
    pub name: String,
    pub spec: AppSpec,
    pub status: AppStatus,
    pub origin: AppOrigin,
    /// Set for `submitted` records; names the peer executing the app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer: Option<PeerName>,
    /// Set for `executing` records; names the peer that submitted the app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_peer: Option<PeerName>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Free-form status detail surfaced in the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// A delete was issued while the peer channel was down; the reconciler
    /// re-sends it on reconnect.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub delete_pending: bool,
    /// The last status push failed; the reconciler re-emits on reconnect.
    #[serde(default, skip_serializing_if = "std::ops::Not::not", rename = "status_dirty")]
    pub status_dirty: bool,
}

impl RemoteApp {
    pub fn submitted(id: AppId, name: impl Into<String>, spec: AppSpec, target: PeerName) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            spec,
            status: AppStatus::Pending,
            origin: AppOrigin::Submitted,
            target_peer: Some(target),
            source_peer: None,
            created_at: now,
            updated_at: now,
            message: None,
            delete_pending: false,
            status_dirty: false,
        }
    }

    pub fn executing(id: AppId, name: impl Into<String>, spec: AppSpec, source: PeerName) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            spec,
            status: AppStatus::Pending,
            origin: AppOrigin::Executing,
            target_peer: None,
            source_peer: Some(source),
            created_at: now,
            updated_at: now,
            message: None,
            delete_pending: false,
            status_dirty: false,
        }
    }

    pub fn set_status(&mut self, status: AppStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
        self.updated_at = Utc::now();
    }
}

/// An app that arrived while `require_remoteapp_approval` was on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: AppId,
    pub name: String,
    pub source_peer: PeerName,
    pub spec: AppSpec,
    pub arrived_at: DateTime<Utc>,
}

#[cfg(test)]
#[path = "remoteapp_tests.rs"]
mod tests;
