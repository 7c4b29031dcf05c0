// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registered method and event names.

// Request methods
pub const PEER_PING: &str = "peer/ping";
pub const REMOTEAPP_CREATE: &str = "remoteapp/create";
pub const REMOTEAPP_DELETE: &str = "remoteapp/delete";
pub const REMOTEAPP_SPEC: &str = "remoteapp/spec";
pub const REMOTEAPP_LOGS: &str = "remoteapp/logs";
pub const PROXY_HTTP: &str = "proxy/http";

// Push events
pub const REMOTEAPP_STATUS: &str = "remoteapp/status";
pub const PEER_GOODBYE: &str = "peer/goodbye";
pub const PROXY_CHUNK: &str = "proxy/chunk";
pub const PROXY_CANCEL: &str = "proxy/cancel";
pub const CANCEL: &str = "cancel";
