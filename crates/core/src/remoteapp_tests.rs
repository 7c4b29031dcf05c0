// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn spec() -> AppSpec {
    serde_json::from_value(json!({"image": "nginx:1.25", "replicas": 2})).unwrap()
}

#[test]
fn submitted_record_has_target_peer_only() {
    let app = RemoteApp::submitted(AppId::new("a1"), "web", spec(), PeerName::new("b"));
    assert_eq!(app.origin, AppOrigin::Submitted);
    assert_eq!(app.target_peer, Some(PeerName::new("b")));
    assert!(app.source_peer.is_none());
    assert_eq!(app.status, AppStatus::Pending);
}

#[test]
fn executing_record_has_source_peer_only() {
    let app = RemoteApp::executing(AppId::new("a1"), "web", spec(), PeerName::new("a"));
    assert_eq!(app.origin, AppOrigin::Executing);
    assert_eq!(app.source_peer, Some(PeerName::new("a")));
    assert!(app.target_peer.is_none());
}

#[test]
fn set_status_bumps_updated_at() {
    let mut app = RemoteApp::submitted(AppId::new("a1"), "web", spec(), PeerName::new("b"));
    let before = app.updated_at;
    app.set_status(AppStatus::Ready, None);
    assert_eq!(app.status, AppStatus::Ready);
    assert!(app.updated_at >= before);
}

#[test]
fn terminal_statuses() {
    assert!(AppStatus::Deleted.is_terminal());
    assert!(AppStatus::Failed.is_terminal());
    assert!(AppStatus::Timeout.is_terminal());
    assert!(AppStatus::Rejected.is_terminal());
    assert!(!AppStatus::Ready.is_terminal());
    assert!(!AppStatus::Pending.is_terminal());
    assert!(!AppStatus::Creating.is_terminal());
}

#[test]
fn status_serializes_capitalized() {
    assert_eq!(serde_json::to_string(&AppStatus::Ready).unwrap(), "\"Ready\"");
    assert_eq!(AppStatus::Ready.to_string(), "Ready");
}

#[test]
fn flags_are_omitted_when_clear() {
    let app = RemoteApp::submitted(AppId::new("a1"), "web", spec(), PeerName::new("b"));
    let value = serde_json::to_value(&app).unwrap();
    assert!(value.get("delete_pending").is_none());
    assert!(value.get("status_dirty").is_none());
}

#[test]
fn record_round_trips() {
    let mut app = RemoteApp::executing(AppId::new("a1"), "web", spec(), PeerName::new("a"));
    app.set_status(AppStatus::Running, Some("1/2 ready".to_string()));
    app.status_dirty = true;
    let json = serde_json::to_string(&app).unwrap();
    let back: RemoteApp = serde_json::from_str(&json).unwrap();
    assert_eq!(back, app);
}
