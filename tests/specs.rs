// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level integration specs: two in-process agents exercising
//! trust bootstrap, the persistent channel, and durable state together,
//! with in-memory transports standing in for sockets.

use porpulsion_core::{AppId, AppSpec, PeerName, PeerStatus, RemoteApp};
use porpulsion_daemon::credentials::CredentialStore;
use porpulsion_daemon::handshake::{HandshakeError, HandshakeService};
use porpulsion_daemon::{ChannelError, ChannelManager, MessageRouter, Transport};
use porpulsion_storage::StateRegistry;
use porpulsion_wire::HandshakeRequest;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Agent {
    _dir: tempfile::TempDir,
    registry: Arc<StateRegistry>,
    credentials: Arc<CredentialStore>,
    channels: Arc<ChannelManager>,
    handshake: Arc<HandshakeService>,
}

fn agent(name: &str) -> Agent {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(StateRegistry::open(dir.path()).unwrap());
    let credentials = Arc::new(CredentialStore::init(Arc::clone(&registry), name).unwrap());
    let channels = ChannelManager::new(Arc::clone(&registry), &credentials.ca_pem());
    let mut router = MessageRouter::new();
    router.on_request("peer/ping", |_peer, _payload| async { Ok(json!({"pong": true})) });
    channels.set_router(Arc::new(router));
    let handshake = HandshakeService::new(
        Arc::clone(&registry),
        Arc::clone(&credentials),
        Arc::clone(&channels),
        name,
        &format!("https://{name}.example"),
    );
    Agent { _dir: dir, registry, credentials, channels, handshake }
}

fn peer_request(from: &Agent, from_name: &str, to: &Agent) -> HandshakeRequest {
    HandshakeRequest {
        name: from_name.to_string(),
        self_url: format!("https://{from_name}.example"),
        ca_pem: from.credentials.ca_pem(),
        invite_token: to.credentials.invite_token(),
        expected_fingerprint: to.credentials.fingerprint(),
    }
}

#[tokio::test]
async fn handshake_pins_matching_fingerprints_on_both_sides() {
    let a = agent("a");
    let b = agent("b");

    // a redeems b's invite (as the dashboard-side initiate would via HTTP).
    let reply = b.handshake.handle_inbound(&peer_request(&a, "a", &b)).unwrap();

    // The initiator pins the returned CA after verifying its hash.
    let fp = porpulsion_daemon::fingerprint_pem(&reply.ca_pem).unwrap();
    assert_eq!(fp, b.credentials.fingerprint());
    a.registry
        .insert_peer(porpulsion_core::Peer::new(
            PeerName::new("b"),
            "https://b.example",
            reply.ca_pem.clone(),
            fp,
            PeerStatus::Connecting,
        ))
        .unwrap();

    // Invariant: SHA256(p.ca_pem) == p.ca_fingerprint for every peer.
    for registry in [&a.registry, &b.registry] {
        for peer in registry.peers() {
            assert_eq!(
                porpulsion_daemon::fingerprint_pem(&peer.ca_pem).unwrap(),
                peer.ca_fingerprint
            );
        }
    }
}

#[tokio::test]
async fn invite_token_is_single_use_across_agents() {
    let a = agent("a");
    let b = agent("b");
    let c = agent("c");

    let request = peer_request(&a, "a", &b);
    b.handshake.handle_inbound(&request).unwrap();

    // The same token replayed by anyone fails.
    let mut replay = peer_request(&c, "c", &b);
    replay.invite_token = request.invite_token.clone();
    let err = b.handshake.handle_inbound(&replay).unwrap_err();
    assert!(matches!(err, HandshakeError::InviteTokenInvalid));
}

#[tokio::test]
async fn channel_round_trip_between_two_agents() {
    let a = agent("a");
    let b = agent("b");

    let (ta, tb) = Transport::pair();
    a.channels.attach(&PeerName::new("b"), ta);
    b.channels.attach(&PeerName::new("a"), tb);

    let reply = a.channels.send(&PeerName::new("b"), "peer/ping", json!({})).await.unwrap();
    assert_eq!(reply, json!({"pong": true}));
    let reply = b.channels.send(&PeerName::new("a"), "peer/ping", json!({})).await.unwrap();
    assert_eq!(reply, json!({"pong": true}));
}

#[tokio::test]
async fn duplicate_dial_converges_to_one_live_channel() {
    let a = agent("a");
    let b = agent("b");

    // Both sides dial simultaneously: two transport pairs exist.
    let (ta1, tb1) = Transport::pair();
    let (ta2, tb2) = Transport::pair();
    a.channels.attach(&PeerName::new("b"), ta1);
    b.channels.attach(&PeerName::new("a"), tb1);
    a.channels.attach(&PeerName::new("b"), ta2);
    b.channels.attach(&PeerName::new("a"), tb2);

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Exactly one channel survives on each side, and it works.
    assert!(a.channels.is_connected(&PeerName::new("b")));
    assert!(b.channels.is_connected(&PeerName::new("a")));
    let reply = a.channels.send(&PeerName::new("b"), "peer/ping", json!({})).await.unwrap();
    assert_eq!(reply, json!({"pong": true}));
}

#[tokio::test]
async fn sends_fail_cleanly_when_peer_is_removed() {
    let a = agent("a");
    let b = agent("b");
    let (ta, tb) = Transport::pair();
    a.channels.attach(&PeerName::new("b"), ta);
    b.channels.attach(&PeerName::new("a"), tb);

    a.channels.remove_peer(&PeerName::new("b"));
    let err = a.channels.send(&PeerName::new("b"), "peer/ping", json!({})).await.unwrap_err();
    assert_eq!(err, ChannelError::Down);
}

#[tokio::test]
async fn submitted_apps_survive_restart_with_same_ids() {
    let dir = tempfile::tempdir().unwrap();
    let spec: AppSpec =
        serde_json::from_value(json!({"image": "nginx:1.25", "replicas": 2})).unwrap();

    {
        let registry = StateRegistry::open(dir.path()).unwrap();
        registry
            .insert_submitted(RemoteApp::submitted(
                AppId::new("stable-id-1"),
                "web",
                spec.clone(),
                PeerName::new("b"),
            ))
            .unwrap();
    }

    // Simulated restart: the agent is stateless at the process level.
    let registry = StateRegistry::open(dir.path()).unwrap();
    let apps = registry.submitted();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].id, AppId::new("stable-id-1"));
    assert_eq!(apps[0].spec, spec);
}

#[tokio::test]
async fn credentials_survive_restart_with_same_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let fp = {
        let registry = Arc::new(StateRegistry::open(dir.path()).unwrap());
        CredentialStore::init(registry, "a").unwrap().fingerprint()
    };
    let registry = Arc::new(StateRegistry::open(dir.path()).unwrap());
    let creds = CredentialStore::init(registry, "a").unwrap();
    assert_eq!(creds.fingerprint(), fp);
}
