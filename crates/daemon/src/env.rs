// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Resolve state directory: PORPULSION_STATE_DIR > XDG_STATE_HOME/porpulsion
/// > ~/.local/state/porpulsion
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("PORPULSION_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("porpulsion"));
    }
    std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".local/state/porpulsion"))
}

/// Pod IP injected by the orchestrator; used to auto-detect `self_url`.
pub fn pod_ip() -> Option<String> {
    std::env::var("POD_IP").ok().filter(|s| !s.is_empty())
}

/// Pod namespace injected by the orchestrator.
pub fn pod_namespace() -> Option<String> {
    std::env::var("POD_NAMESPACE").ok().filter(|s| !s.is_empty())
}

/// Channel request deadline (default 30s).
pub fn request_timeout() -> Duration {
    std::env::var("PORPULSION_REQUEST_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30))
}

/// Handshake round-trip deadline (default 15s).
pub fn handshake_timeout() -> Duration {
    std::env::var("PORPULSION_HANDSHAKE_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(15))
}

/// Reconciler sweep interval (default 5s).
pub fn reconcile_interval() -> Duration {
    std::env::var("PORPULSION_RECONCILE_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}
