// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn peer(url: &str) -> Peer {
    Peer::new(
        PeerName::new("b"),
        url,
        "-----BEGIN CERTIFICATE-----\nx\n-----END CERTIFICATE-----\n",
        "ab:cd",
        PeerStatus::Connecting,
    )
}

#[test]
fn channel_url_maps_https_to_wss() {
    assert_eq!(peer("https://b.example").channel_url(), "wss://b.example/ws");
}

#[test]
fn channel_url_maps_http_to_ws() {
    assert_eq!(peer("http://b.example:8081").channel_url(), "ws://b.example:8081/ws");
}

#[test]
fn channel_url_strips_trailing_slash() {
    assert_eq!(peer("https://b.example/").channel_url(), "wss://b.example/ws");
}

#[test]
fn channel_url_defaults_bare_host_to_ws() {
    assert_eq!(peer("b.example:8081").channel_url(), "ws://b.example:8081/ws");
}

#[test]
fn peer_status_serializes_snake_case() {
    let json = serde_json::to_string(&PeerStatus::AwaitingConfirmation).unwrap();
    assert_eq!(json, "\"awaiting_confirmation\"");
}

#[test]
fn channel_status_display() {
    assert_eq!(ChannelStatus::Connected.to_string(), "connected");
    assert_eq!(ChannelStatus::Disconnected.to_string(), "disconnected");
}
