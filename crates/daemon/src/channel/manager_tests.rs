// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use porpulsion_storage::StateRegistry;
use serde_json::json;
use std::time::Duration;

fn test_registry() -> (tempfile::TempDir, Arc<StateRegistry>) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(StateRegistry::open(dir.path()).unwrap());
    (dir, registry)
}

fn echo_router() -> Arc<MessageRouter> {
    let mut router = MessageRouter::new();
    router.on_request("peer/ping", |_peer, _payload| async { Ok(json!({"pong": true})) });
    router.on_request("echo", |_peer, payload| async move { Ok(payload) });
    router.on_request("slow", |_peer, _payload| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({}))
    });
    router.on_request("fail", |_peer, _payload| async { Err("image_blocked".to_string()) });
    Arc::new(router)
}

/// Two managers joined by an in-memory transport pair, as if each had
/// authenticated the other's upgrade.
fn joined() -> (tempfile::TempDir, tempfile::TempDir, Arc<ChannelManager>, Arc<ChannelManager>) {
    let (dir_a, reg_a) = test_registry();
    let (dir_b, reg_b) = test_registry();
    let a = ChannelManager::new(reg_a, "CA-A");
    let b = ChannelManager::new(reg_b, "CA-B");
    a.set_router(echo_router());
    b.set_router(echo_router());
    let (ta, tb) = Transport::pair();
    a.attach(&PeerName::new("b"), ta);
    b.attach(&PeerName::new("a"), tb);
    (dir_a, dir_b, a, b)
}

#[tokio::test]
async fn request_reply_round_trip() {
    let (_da, _db, a, _b) = joined();
    let reply = a.send(&PeerName::new("b"), "peer/ping", json!({})).await.unwrap();
    assert_eq!(reply, json!({"pong": true}));
}

#[tokio::test]
async fn replies_correlate_out_of_order() {
    let (_da, _db, a, _b) = joined();
    let a2 = Arc::clone(&a);
    let slow = tokio::spawn(async move {
        a2.send_with(
            &PeerName::new("b"),
            "slow",
            json!({}),
            Duration::from_millis(300),
            None,
        )
        .await
    });
    // A fast request issued after the slow one completes first.
    let fast = a.send(&PeerName::new("b"), "echo", json!({"n": 1})).await.unwrap();
    assert_eq!(fast, json!({"n": 1}));
    assert_eq!(slow.await.unwrap(), Err(ChannelError::Timeout));
}

#[tokio::test]
async fn remote_error_reply() {
    let (_da, _db, a, _b) = joined();
    let err = a.send(&PeerName::new("b"), "fail", json!({})).await.unwrap_err();
    assert_eq!(err, ChannelError::Remote("image_blocked".to_string()));
}

#[tokio::test]
async fn unknown_method_surfaces_unknown_type() {
    let (_da, _db, a, _b) = joined();
    let err = a.send(&PeerName::new("b"), "peer/unheard-of", json!({})).await.unwrap_err();
    assert_eq!(err, ChannelError::Remote("unknown type".to_string()));
}

#[tokio::test]
async fn send_without_channel_is_down() {
    let (_dir, registry) = test_registry();
    let manager = ChannelManager::new(registry, "CA");
    let err = manager.send(&PeerName::new("nobody"), "peer/ping", json!({})).await.unwrap_err();
    assert_eq!(err, ChannelError::Down);
}

#[tokio::test]
async fn request_times_out() {
    let (_da, _db, a, _b) = joined();
    let err = a
        .send_with(&PeerName::new("b"), "slow", json!({}), Duration::from_millis(50), None)
        .await
        .unwrap_err();
    assert_eq!(err, ChannelError::Timeout);
}

#[tokio::test]
async fn cancellation_fails_the_send() {
    let (_da, _db, a, _b) = joined();
    let token = CancellationToken::new();
    let peer = PeerName::new("b");
    let fut = a.send_with(&peer, "slow", json!({}), Duration::from_secs(30), Some(token.clone()));
    tokio::pin!(fut);
    // Let the request get onto the wire, then cancel.
    tokio::select! {
        _ = &mut fut => panic!("must not complete yet"),
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }
    token.cancel();
    assert_eq!(fut.await, Err(ChannelError::Cancelled));
}

#[tokio::test]
async fn push_is_delivered_to_handler() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let (_dir_a, reg_a) = test_registry();
    let (_dir_b, reg_b) = test_registry();
    let a = ChannelManager::new(reg_a, "CA-A");
    let b = ChannelManager::new(reg_b, "CA-B");
    a.set_router(echo_router());

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let mut router = MessageRouter::new();
    router.on_push("remoteapp/status", move |_peer, payload| {
        let counter = Arc::clone(&counter);
        async move {
            assert_eq!(payload["status"], "Ready");
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    b.set_router(Arc::new(router));

    let (ta, tb) = Transport::pair();
    a.attach(&PeerName::new("b"), ta);
    b.attach(&PeerName::new("a"), tb);

    a.push(&PeerName::new("b"), "remoteapp/status", json!({"id": "x", "status": "Ready"}))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn push_without_channel_is_down() {
    let (_dir, registry) = test_registry();
    let manager = ChannelManager::new(registry, "CA");
    assert_eq!(
        manager.push(&PeerName::new("nobody"), "remoteapp/status", json!({})),
        Err(ChannelError::Down)
    );
}

#[tokio::test]
async fn newer_connection_replaces_older() {
    let (_da, _db, a, b) = joined();
    let peer_b = PeerName::new("b");

    // Outstanding send on the old channel...
    let a2 = Arc::clone(&a);
    let peer = peer_b.clone();
    let stale = tokio::spawn(async move {
        a2.send_with(&peer, "slow", json!({}), Duration::from_secs(30), None).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // ...then a second authenticated connection arrives for the same peer.
    let (ta2, tb2) = Transport::pair();
    a.attach(&peer_b, ta2);
    b.attach(&PeerName::new("a"), tb2);

    // The old send must fail; the new channel must work.
    assert_eq!(stale.await.unwrap(), Err(ChannelError::Down));
    let reply = a.send(&peer_b, "peer/ping", json!({})).await.unwrap();
    assert_eq!(reply, json!({"pong": true}));
    assert!(a.is_connected(&peer_b));
}

#[tokio::test]
async fn close_channel_fails_outstanding_sends() {
    let (_da, _db, a, _b) = joined();
    let peer = PeerName::new("b");
    let a2 = Arc::clone(&a);
    let p2 = peer.clone();
    let pending = tokio::spawn(async move {
        a2.send_with(&p2, "slow", json!({}), Duration::from_secs(30), None).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.close_channel(&peer);
    assert_eq!(pending.await.unwrap(), Err(ChannelError::Down));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.channel_status(&peer), ChannelStatus::Disconnected);
}

#[tokio::test]
async fn remove_peer_drops_everything() {
    let (_da, _db, a, _b) = joined();
    let peer = PeerName::new("b");
    assert!(a.is_connected(&peer));
    a.remove_peer(&peer);
    assert!(!a.is_connected(&peer));
    assert_eq!(a.send(&peer, "peer/ping", json!({})).await.unwrap_err(), ChannelError::Down);
}

#[tokio::test]
async fn channel_status_tracks_liveness() {
    let (_dir, registry) = test_registry();
    let manager = ChannelManager::new(registry, "CA");
    let peer = PeerName::new("b");
    assert_eq!(manager.channel_status(&peer), ChannelStatus::Disconnected);
    let (ta, _tb) = Transport::pair();
    manager.attach(&peer, ta);
    assert_eq!(manager.channel_status(&peer), ChannelStatus::Connected);
}

#[tokio::test]
async fn goodbye_closes_all_channels() {
    let (_da, _db, a, _b) = joined();
    a.goodbye_all().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!a.is_connected(&PeerName::new("b")));
}
