// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn create_reply_omits_clear_flags() {
    let reply = CreateAppReply { accepted: true, reason: None, pending_approval: false };
    let value = serde_json::to_value(&reply).unwrap();
    assert_eq!(value, json!({"accepted": true}));
}

#[test]
fn create_reply_with_pending_approval() {
    let reply = CreateAppReply { accepted: true, reason: None, pending_approval: true };
    let value = serde_json::to_value(&reply).unwrap();
    assert_eq!(value, json!({"accepted": true, "pending_approval": true}));
}

#[test]
fn logs_request_defaults() {
    let req: LogsRequest = serde_json::from_value(json!({"id": "a1"})).unwrap();
    assert_eq!(req.tail, 100);
    assert_eq!(req.order, LogOrder::Pod);
}

#[test]
fn log_order_parses_lowercase() {
    let req: LogsRequest =
        serde_json::from_value(json!({"id": "a1", "tail": 10, "order": "time"})).unwrap();
    assert_eq!(req.order, LogOrder::Time);
}

#[test]
fn proxy_chunk_final_field_is_renamed() {
    let chunk = ProxyChunkPush {
        stream_id: "s1".to_string(),
        chunk_b64: None,
        is_final: true,
        status: None,
        headers: None,
    };
    let value = serde_json::to_value(&chunk).unwrap();
    assert_eq!(value, json!({"stream_id": "s1", "final": true}));
}

#[test]
fn proxy_request_round_trips() {
    let req = ProxyHttpRequest {
        id: AppId::new("a1"),
        port: 80,
        method: "GET".to_string(),
        path: "/".to_string(),
        query: Some("x=1".to_string()),
        headers: [("accept".to_string(), "text/html".to_string())].into_iter().collect(),
        body_b64: None,
        stream_id: "s1".to_string(),
    };
    let text = serde_json::to_string(&req).unwrap();
    let back: ProxyHttpRequest = serde_json::from_str(&text).unwrap();
    assert_eq!(back, req);
}

#[test]
fn status_push_round_trips() {
    let push = StatusPush {
        id: AppId::new("a1"),
        status: AppStatus::Running,
        message: Some("1/2 ready".to_string()),
    };
    let value = serde_json::to_value(&push).unwrap();
    assert_eq!(value, json!({"id": "a1", "status": "Running", "message": "1/2 ready"}));
}

#[test]
fn handshake_request_round_trips() {
    let req = HandshakeRequest {
        name: "a".to_string(),
        self_url: "https://a.example".to_string(),
        ca_pem: "-----BEGIN CERTIFICATE-----\n...".to_string(),
        invite_token: "tok".to_string(),
        expected_fingerprint: "ab:cd".to_string(),
    };
    let text = serde_json::to_string(&req).unwrap();
    let back: HandshakeRequest = serde_json::from_str(&text).unwrap();
    assert_eq!(back, req);
}
