// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::credentials::CredentialStore;

struct Agent {
    _dir: tempfile::TempDir,
    registry: Arc<StateRegistry>,
    credentials: Arc<CredentialStore>,
    service: Arc<HandshakeService>,
}

fn agent(name: &str) -> Agent {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(StateRegistry::open(dir.path()).unwrap());
    let credentials =
        Arc::new(CredentialStore::init(Arc::clone(&registry), name).unwrap());
    let channels = ChannelManager::new(Arc::clone(&registry), &credentials.ca_pem());
    let service = HandshakeService::new(
        Arc::clone(&registry),
        Arc::clone(&credentials),
        channels,
        name,
        &format!("https://{name}.example"),
    );
    Agent { _dir: dir, registry, credentials, service }
}

fn request_from(a: &Agent, b: &Agent) -> HandshakeRequest {
    HandshakeRequest {
        name: "a".to_string(),
        self_url: "https://a.example".to_string(),
        ca_pem: a.credentials.ca_pem(),
        invite_token: b.credentials.invite_token(),
        expected_fingerprint: b.credentials.fingerprint(),
    }
}

#[tokio::test]
async fn inbound_redemption_pins_and_rotates() {
    let a = agent("a");
    let b = agent("b");
    let old_token = b.credentials.invite_token();

    let reply = b.service.handle_inbound(&request_from(&a, &b)).unwrap();

    assert_eq!(reply.name, "b");
    assert_eq!(reply.ca_pem, b.credentials.ca_pem());
    assert_ne!(reply.invite_token, old_token, "reply must carry the rotated token");
    assert_eq!(b.credentials.invite_token(), reply.invite_token);

    let pinned = b.registry.peer(&PeerName::new("a")).unwrap();
    assert_eq!(pinned.status, PeerStatus::AwaitingConfirmation);
    assert_eq!(pinned.ca_fingerprint, a.credentials.fingerprint());
    assert_eq!(pinned.url, "https://a.example");
}

#[tokio::test]
async fn wrong_invite_token_is_rejected_without_state() {
    let a = agent("a");
    let b = agent("b");
    let token = b.credentials.invite_token();

    let mut request = request_from(&a, &b);
    request.invite_token = "wrong".to_string();
    let err = b.service.handle_inbound(&request).unwrap_err();

    assert!(matches!(err, HandshakeError::InviteTokenInvalid));
    assert!(b.registry.peers().is_empty(), "no peer state on error");
    assert_eq!(b.credentials.invite_token(), token, "token must survive a failed redeem");
}

#[tokio::test]
async fn wrong_expected_fingerprint_does_not_consume_invite() {
    let a = agent("a");
    let b = agent("b");
    let token = b.credentials.invite_token();

    let mut request = request_from(&a, &b);
    // Off by one hex digit.
    let mut fp = request.expected_fingerprint.clone().into_bytes();
    fp[0] = if fp[0] == b'0' { b'1' } else { b'0' };
    request.expected_fingerprint = String::from_utf8(fp).unwrap();

    let err = b.service.handle_inbound(&request).unwrap_err();
    assert!(matches!(err, HandshakeError::FingerprintMismatch { .. }));
    assert!(b.registry.peers().is_empty());
    assert_eq!(b.credentials.invite_token(), token, "invite must not be consumed");
}

#[tokio::test]
async fn replayed_invite_fails_the_second_time() {
    let a = agent("a");
    let b = agent("b");
    let request = request_from(&a, &b);
    b.service.handle_inbound(&request).unwrap();

    // Another agent replaying the consumed token.
    let c = agent("c");
    let mut replay = request_from(&c, &b);
    replay.name = "c".to_string();
    replay.invite_token = request.invite_token.clone();
    let err = b.service.handle_inbound(&replay).unwrap_err();
    assert!(matches!(err, HandshakeError::InviteTokenInvalid));
}

#[tokio::test]
async fn same_ca_different_name_is_a_collision() {
    let a = agent("a");
    let b = agent("b");
    b.service.handle_inbound(&request_from(&a, &b)).unwrap();

    let mut imposter = request_from(&a, &b);
    imposter.name = "not-a".to_string();
    imposter.invite_token = b.credentials.invite_token();
    let err = b.service.handle_inbound(&imposter).unwrap_err();
    assert!(matches!(err, HandshakeError::FingerprintCollision { .. }));
    assert_eq!(b.registry.peers().len(), 1);
}

#[tokio::test]
async fn re_peering_same_agent_refreshes_the_record() {
    let a = agent("a");
    let b = agent("b");
    b.service.handle_inbound(&request_from(&a, &b)).unwrap();

    let mut again = request_from(&a, &b);
    again.self_url = "https://a2.example".to_string();
    again.invite_token = b.credentials.invite_token();
    b.service.handle_inbound(&again).unwrap();

    let peers = b.registry.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].url, "https://a2.example");
}

#[tokio::test]
async fn bad_ca_pem_is_rejected() {
    let a = agent("a");
    let b = agent("b");
    let mut request = request_from(&a, &b);
    request.ca_pem = "garbage".to_string();
    let err = b.service.handle_inbound(&request).unwrap_err();
    assert!(matches!(err, HandshakeError::BadCa(_)));
}

#[tokio::test]
async fn initiate_rejects_duplicate_local_name() {
    let a = agent("a");
    let b = agent("b");
    // Pin b under the name "b" first.
    a.registry
        .insert_peer(Peer::new(
            PeerName::new("b"),
            "https://b.example",
            b.credentials.ca_pem(),
            b.credentials.fingerprint(),
            PeerStatus::Connecting,
        ))
        .unwrap();
    let err = a
        .service
        .initiate(&PeerName::new("b"), "https://b.example", "tok", "ff:ff")
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::NameCollision(_)));
}

#[test]
fn error_kinds_are_stable() {
    assert_eq!(HandshakeError::InviteTokenInvalid.kind(), "invite_token_invalid");
    assert_eq!(
        HandshakeError::FingerprintMismatch {
            expected: "a".to_string(),
            actual: "b".to_string()
        }
        .kind(),
        "fingerprint_mismatch"
    );
    assert_eq!(
        HandshakeError::FingerprintCollision { existing: "x".to_string() }.kind(),
        "fingerprint_collision"
    );
}
