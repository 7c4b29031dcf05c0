// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handshake service: invite redemption and CA exchange.
//!
//! The inbound side verifies the caller's expected fingerprint against our
//! own CA *before* consuming the invite token — a mistyped fingerprint
//! must not burn the invite. Redemption rotates the token within the same
//! request, so it is single-use by construction. No partial peer state
//! survives any error path on either side.

use crate::channel::ChannelManager;
use crate::credentials::{fingerprint_pem, CredentialError, CredentialStore};
use crate::env;
use porpulsion_core::{Peer, PeerName, PeerStatus};
use porpulsion_storage::{RegistryError, StateRegistry};
use porpulsion_wire::{HandshakeReply, HandshakeRequest};
use std::sync::Arc;
use thiserror::Error;

/// Typed handshake failures; `kind` strings are part of the REST contract.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("invite_token_invalid")]
    InviteTokenInvalid,
    #[error("fingerprint_mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
    #[error("fingerprint_collision: CA already pinned for peer {existing:?}")]
    FingerprintCollision { existing: String },
    #[error("name_collision: peer {0:?} already exists")]
    NameCollision(String),
    #[error("handshake timed out")]
    Timeout,
    #[error("peer returned {status}: {kind}")]
    Remote { status: u16, kind: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid peer CA: {0}")]
    BadCa(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl HandshakeError {
    /// Short machine-readable kind for REST bodies and notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeError::InviteTokenInvalid => "invite_token_invalid",
            HandshakeError::FingerprintMismatch { .. } => "fingerprint_mismatch",
            HandshakeError::FingerprintCollision { .. } => "fingerprint_collision",
            HandshakeError::NameCollision(_) => "name_collision",
            HandshakeError::Timeout => "timeout",
            HandshakeError::Remote { .. } => "remote_error",
            HandshakeError::Transport(_) => "transport_error",
            HandshakeError::BadCa(_) => "bad_ca",
            HandshakeError::Registry(_) => "internal_error",
        }
    }
}

pub struct HandshakeService {
    registry: Arc<StateRegistry>,
    credentials: Arc<CredentialStore>,
    channels: Arc<ChannelManager>,
    agent_name: String,
    self_url: String,
    http: reqwest::Client,
}

impl HandshakeService {
    pub fn new(
        registry: Arc<StateRegistry>,
        credentials: Arc<CredentialStore>,
        channels: Arc<ChannelManager>,
        agent_name: &str,
        self_url: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            credentials,
            channels,
            agent_name: agent_name.to_string(),
            self_url: self_url.to_string(),
            http: reqwest::Client::new(),
        })
    }

    /// Serve an inbound `POST /peer` redemption.
    pub fn handle_inbound(&self, request: &HandshakeRequest) -> Result<HandshakeReply, HandshakeError> {
        // The caller names the CA it expects; a wrong expectation fails
        // before the invite token is consumed.
        let own_fingerprint = self.credentials.fingerprint();
        if request.expected_fingerprint != own_fingerprint {
            return Err(HandshakeError::FingerprintMismatch {
                expected: request.expected_fingerprint.clone(),
                actual: own_fingerprint,
            });
        }

        let requester_fingerprint =
            fingerprint_pem(&request.ca_pem).map_err(|e| HandshakeError::BadCa(e.to_string()))?;

        let new_token = match self.credentials.redeem(&request.invite_token) {
            Ok(token) => token,
            Err(CredentialError::InviteTokenInvalid) => {
                return Err(HandshakeError::InviteTokenInvalid)
            }
            Err(e) => return Err(HandshakeError::Transport(e.to_string())),
        };

        // A known CA under a different name is an impersonation attempt.
        if let Some(existing) = self.registry.peer_by_fingerprint(&requester_fingerprint) {
            if existing.name.as_str() != request.name {
                return Err(HandshakeError::FingerprintCollision {
                    existing: existing.name.to_string(),
                });
            }
        }

        let name = PeerName::new(request.name.clone());
        let peer = Peer::new(
            name.clone(),
            request.self_url.clone(),
            request.ca_pem.clone(),
            requester_fingerprint.clone(),
            PeerStatus::AwaitingConfirmation,
        );
        match self.registry.peer(&name) {
            // Same agent peering again (e.g. after losing its state):
            // refresh the record in place.
            Some(existing) if existing.ca_fingerprint == requester_fingerprint => {
                self.registry.update_peer(&name, |p| {
                    p.url = request.self_url.clone();
                    p.last_error = None;
                })?;
            }
            Some(existing) => {
                return Err(HandshakeError::NameCollision(existing.name.to_string()))
            }
            None => match self.registry.insert_peer(peer.clone()) {
                Ok(()) => {}
                Err(RegistryError::PeerExists(name)) => {
                    return Err(HandshakeError::NameCollision(name))
                }
                Err(e) => return Err(e.into()),
            },
        }
        // The channel dialer lets the record converge to `connected` even
        // before the operator confirms.
        self.channels.ensure_peer(&peer);

        tracing::info!(peer = %request.name, "inbound handshake accepted");
        Ok(HandshakeReply {
            name: self.agent_name.clone(),
            self_url: self.self_url.clone(),
            ca_pem: self.credentials.ca_pem(),
            invite_token: new_token,
        })
    }

    /// Initiate a handshake toward `url`, verifying the returned CA
    /// against the fingerprint received out-of-band.
    pub async fn initiate(
        &self,
        peer_name: &PeerName,
        url: &str,
        invite_token: &str,
        expected_fingerprint: &str,
    ) -> Result<Peer, HandshakeError> {
        if self.registry.peer(peer_name).is_some() {
            return Err(HandshakeError::NameCollision(peer_name.to_string()));
        }

        let request = HandshakeRequest {
            name: self.agent_name.clone(),
            self_url: self.self_url.clone(),
            ca_pem: self.credentials.ca_pem(),
            invite_token: invite_token.to_string(),
            expected_fingerprint: expected_fingerprint.to_string(),
        };

        let endpoint = format!("{}/peer", url.trim_end_matches('/'));
        let response = tokio::time::timeout(
            env::handshake_timeout(),
            self.http.post(&endpoint).json(&request).send(),
        )
        .await
        .map_err(|_| HandshakeError::Timeout)?
        .map_err(|e| HandshakeError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let kind = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(String::from))
                .unwrap_or_else(|| "remote_error".to_string());
            if kind == "invite_token_invalid" {
                return Err(HandshakeError::InviteTokenInvalid);
            }
            return Err(HandshakeError::Remote { status, kind });
        }

        let reply: HandshakeReply = response
            .json()
            .await
            .map_err(|e| HandshakeError::Transport(e.to_string()))?;

        // Pin only a CA whose fingerprint matches the out-of-band value.
        let actual = fingerprint_pem(&reply.ca_pem)
            .map_err(|e| HandshakeError::BadCa(e.to_string()))?;
        if actual != expected_fingerprint {
            return Err(HandshakeError::FingerprintMismatch {
                expected: expected_fingerprint.to_string(),
                actual,
            });
        }

        let peer = Peer::new(
            peer_name.clone(),
            url.to_string(),
            reply.ca_pem,
            actual,
            PeerStatus::Connecting,
        );
        match self.registry.insert_peer(peer.clone()) {
            Ok(()) => {}
            Err(RegistryError::PeerExists(name)) => {
                return Err(HandshakeError::NameCollision(name))
            }
            Err(RegistryError::FingerprintCollision { existing, .. }) => {
                return Err(HandshakeError::FingerprintCollision { existing })
            }
            Err(e) => return Err(e.into()),
        }
        self.channels.ensure_peer(&peer);

        tracing::info!(peer = %peer_name, remote = %reply.name, "handshake complete, dialing channel");
        Ok(peer)
    }
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
