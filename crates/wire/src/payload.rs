// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed payloads for the registered methods and events.
//!
//! Handlers decode these at the router boundary; a payload that fails to
//! decode produces a structured error reply, never a dropped connection.

use porpulsion_core::{AppId, AppSpec, AppStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Handshake (HTTP POST /peer, not a channel frame) ──────────────────────

/// Body the initiating agent posts to the remote `/peer` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// The initiator's agent name, used to key the peer record remotely.
    pub name: String,
    /// Externally reachable base URL of the initiator.
    pub self_url: String,
    /// The initiator's CA certificate PEM, to be pinned by the remote.
    pub ca_pem: String,
    pub invite_token: String,
    /// Fingerprint the operator expects of the remote CA, verified by the
    /// remote before the invite token is consumed and again by the
    /// initiator against the returned PEM.
    pub expected_fingerprint: String,
}

/// Successful handshake response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeReply {
    pub name: String,
    pub self_url: String,
    pub ca_pem: String,
    /// The freshly rotated invite token; proves the redeemed one is dead.
    pub invite_token: String,
}

// ── peer/* ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReply {
    pub pong: bool,
}

// ── remoteapp/* ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAppRequest {
    pub id: AppId,
    pub name: String,
    pub spec: AppSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAppReply {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteAppRequest {
    pub id: AppId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecUpdateRequest {
    pub id: AppId,
    pub spec: AppSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOrder {
    #[default]
    Pod,
    Time,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsRequest {
    pub id: AppId,
    #[serde(default = "default_tail")]
    pub tail: i64,
    #[serde(default)]
    pub order: LogOrder,
}

fn default_tail() -> i64 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub ts: String,
    pub pod: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsReply {
    pub lines: Vec<LogLine>,
}

/// Pushed by the executor on every Deployment status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPush {
    pub id: AppId,
    pub status: AppStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ── proxy/* ───────────────────────────────────────────────────────────────

/// A tunneled HTTP request. The submitter mints `stream_id`; response
/// chunks arrive as [`ProxyChunkPush`] events carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyHttpRequest {
    pub id: AppId,
    pub port: u16,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Already filtered of hop-by-hop headers by the sender.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_b64: Option<String>,
    pub stream_id: String,
}

/// Reply to `proxy/http`: the request was admitted and chunks will follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyHttpReply {
    pub stream_id: String,
}

/// One chunk of a tunneled response body. The first chunk of a stream
/// carries `status` and `headers`; the last sets `final`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyChunkPush {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_b64: Option<String>,
    #[serde(rename = "final", default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

/// Caller-side cancellation of an outstanding request (`cancel`) or of a
/// tunnel stream (`proxy/cancel`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelPush {
    pub id: String,
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
