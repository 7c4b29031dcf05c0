// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk blob schemas.

use porpulsion_core::{Notification, PendingApproval, Peer, RemoteApp, Settings};
use serde::{Deserialize, Serialize};

/// The sensitive blob: keypairs, invite token, and pinned peer CAs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SensitiveState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_token: Option<String>,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

/// The plain blob: apps, approvals, settings, notifications.
///
/// Executing apps are absent on purpose — they are reconstructed from the
/// cluster by the reconciler after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PersistedState {
    #[serde(default)]
    pub submitted: Vec<RemoteApp>,
    #[serde(default)]
    pub pending_approval: Vec<PendingApproval>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}
