// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer records.
//!
//! A peer is another agent, pinned by the SHA-256 fingerprint of its
//! self-signed CA certificate. The `status` field tracks the peering
//! lifecycle; the live channel state is kept separately because it follows
//! the socket, not the record.

use crate::id::PeerName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Peering lifecycle state of a peer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    /// We initiated the handshake and are dialing the channel.
    Connecting,
    /// The peer redeemed our invite; waiting for operator confirmation.
    AwaitingConfirmation,
    /// Channel has been authenticated at least once.
    Connected,
    /// Handshake or channel setup failed permanently.
    Failed,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerStatus::Connecting => write!(f, "connecting"),
            PeerStatus::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            PeerStatus::Connected => write!(f, "connected"),
            PeerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Live channel state, reported alongside the peer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Connected => write!(f, "connected"),
            ChannelStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A remote agent known to this one.
///
/// Invariants: `(name, ca_fingerprint)` is unique within the registry and
/// no record exists without a pinned `ca_pem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub name: PeerName,
    /// Externally reachable base URL of the peer's handshake endpoint.
    pub url: String,
    /// Pinned CA certificate PEM.
    pub ca_pem: String,
    /// SHA-256 of the DER-encoded CA certificate, lowercase colon-hex.
    pub ca_fingerprint: String,
    pub status: PeerStatus,
    #[serde(default)]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Peer {
    pub fn new(
        name: PeerName,
        url: impl Into<String>,
        ca_pem: impl Into<String>,
        ca_fingerprint: impl Into<String>,
        status: PeerStatus,
    ) -> Self {
        Self {
            name,
            url: url.into(),
            ca_pem: ca_pem.into(),
            ca_fingerprint: ca_fingerprint.into(),
            status,
            connected_at: None,
            last_error: None,
        }
    }

    /// Outbound WebSocket URL for the persistent channel: `https→wss`,
    /// `http→ws`, path `/ws`.
    pub fn channel_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{base}")
        };
        format!("{ws}/ws")
    }
}

#[cfg(test)]
#[path = "peer_tests.rs"]
mod tests;
