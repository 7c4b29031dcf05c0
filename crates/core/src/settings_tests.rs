// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn defaults_match_contract() {
    let s = Settings::default();
    assert!(s.allow_inbound_remoteapps);
    assert!(!s.require_remoteapp_approval);
    assert!(s.allow_inbound_tunnels);
    assert_eq!(s.max_replicas_per_app, 0);
    assert_eq!(s.log_level, LogLevel::Info);
    assert!(s.allowed_source_peers_list().is_empty());
}

#[test]
fn merge_updates_only_named_fields() {
    let base = Settings::default();
    let next = base
        .merge(&json!({"allowed_images": "registry.internal/", "max_replicas_per_app": 5}))
        .unwrap();
    assert_eq!(next.allowed_images, "registry.internal/");
    assert_eq!(next.max_replicas_per_app, 5);
    // Untouched fields keep their values.
    assert!(next.allow_inbound_remoteapps);
}

#[test]
fn merge_rejects_unknown_keys() {
    let err = Settings::default().merge(&json!({"allow_everything": true})).unwrap_err();
    assert_eq!(err, SettingsError::UnknownKey("allow_everything".to_string()));
}

#[test]
fn merge_rejects_bad_quantity() {
    let err =
        Settings::default().merge(&json!({"max_total_cpu_requests": "lots"})).unwrap_err();
    assert!(matches!(err, SettingsError::InvalidValue { .. }));
}

#[test]
fn merge_rejects_wrong_type() {
    let err = Settings::default().merge(&json!({"max_replicas_per_app": "five"}));
    assert!(err.is_err());
}

#[test]
fn merge_is_last_writer_wins_per_field() {
    let base = Settings::default();
    let a = base.merge(&json!({"max_replicas_per_app": 3})).unwrap();
    let b = a.merge(&json!({"max_replicas_per_app": 7})).unwrap();
    assert_eq!(b.max_replicas_per_app, 7);
    // Merging disjoint patches commutes.
    let left = base
        .merge(&json!({"allowed_images": "a/"}))
        .unwrap()
        .merge(&json!({"blocked_images": "b/"}))
        .unwrap();
    let right = base
        .merge(&json!({"blocked_images": "b/"}))
        .unwrap()
        .merge(&json!({"allowed_images": "a/"}))
        .unwrap();
    assert_eq!(left, right);
}

#[test]
fn csv_lists_trim_and_skip_empties() {
    let s = Settings::default()
        .merge(&json!({"allowed_source_peers": " east , west ,,"}))
        .unwrap();
    assert_eq!(s.allowed_source_peers_list(), vec!["east", "west"]);
}

#[test]
fn quantity_caps_parse() {
    let s = Settings::default()
        .merge(&json!({"max_cpu_request_per_pod": "500m", "max_total_memory_requests": "8Gi"}))
        .unwrap();
    assert_eq!(s.max_cpu_request_per_pod().unwrap().milli(), 500);
    assert!(s.max_total_memory_requests().is_some());
    assert!(s.max_memory_request_per_pod().is_none());
}

#[test]
fn log_level_round_trips_uppercase() {
    assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"WARN\"");
    let level: LogLevel = serde_json::from_str("\"DEBUG\"").unwrap();
    assert_eq!(level, LogLevel::Debug);
    assert_eq!(level.as_filter(), "debug");
}
