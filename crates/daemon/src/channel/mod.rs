// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-peer persistent channel manager.
//!
//! One authenticated WebSocket per peer carries every inter-agent
//! interaction. The manager owns the live connections: it dials outbound
//! with exponential backoff, accepts authenticated inbound upgrades,
//! resolves duplicate connections (newer wins on both sides, which
//! converges in one round), correlates requests with replies, and keeps
//! the link alive with pings.

mod backoff;
mod conn;
mod transport;

pub use transport::{Transport, TransportEvent, TransportSend};

use crate::env;
use crate::router::MessageRouter;
use backoff::Backoff;
use conn::Conn;
use parking_lot::Mutex;
use porpulsion_core::{ChannelStatus, Peer, PeerName, PeerStatus};
use porpulsion_storage::StateRegistry;
use porpulsion_wire::{method, new_request_id, Frame};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Errors surfaced by [`ChannelManager::send`] and friends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel_down")]
    Down,
    #[error("timeout")]
    Timeout,
    #[error("remote_error: {0}")]
    Remote(String),
    #[error("cancelled")]
    Cancelled,
}

struct PeerSlot {
    conn: Option<Conn>,
    connected: watch::Sender<bool>,
    dialer_cancel: Option<CancellationToken>,
}

impl PeerSlot {
    fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self { conn: None, connected, dialer_cancel: None }
    }
}

pub struct ChannelManager {
    registry: Arc<StateRegistry>,
    /// Base64 of our CA PEM, presented in `X-Agent-Ca` on outbound dials.
    self_ca_b64: String,
    router: Mutex<Arc<MessageRouter>>,
    peers: Mutex<HashMap<PeerName, PeerSlot>>,
    conn_seq: AtomicU64,
}

impl ChannelManager {
    pub fn new(registry: Arc<StateRegistry>, self_ca_pem: &str) -> Arc<Self> {
        use base64::Engine;
        Arc::new(Self {
            registry,
            self_ca_b64: base64::engine::general_purpose::STANDARD.encode(self_ca_pem),
            router: Mutex::new(Arc::new(MessageRouter::new())),
            peers: Mutex::new(HashMap::new()),
            conn_seq: AtomicU64::new(1),
        })
    }

    /// Install the message router. Must happen before the first channel is
    /// attached; frames arriving earlier see an empty router.
    pub fn set_router(&self, router: Arc<MessageRouter>) {
        *self.router.lock() = router;
    }

    fn router(&self) -> Arc<MessageRouter> {
        Arc::clone(&self.router.lock())
    }

    // ── Attach / detach ──────────────────────────────────────────────────

    /// Install a live transport for `peer`, replacing any existing channel
    /// (newer wins). Returns the connection id.
    pub fn attach(self: &Arc<Self>, peer: &PeerName, transport: Transport) -> u64 {
        let conn_id = self.conn_seq.fetch_add(1, Ordering::Relaxed);
        let (conn, out_rx) = Conn::new(conn_id);

        let replaced = {
            let mut peers = self.peers.lock();
            let slot = peers.entry(peer.clone()).or_insert_with(PeerSlot::new);
            let old = slot.conn.replace(conn.clone());
            let _ = slot.connected.send(true);
            old
        };
        if let Some(old) = replaced {
            tracing::info!(peer = %peer, old = old.id, new = conn_id, "replacing channel, newer wins");
            old.cancel.cancel();
            old.fail_pending(ChannelError::Down);
        }

        let manager = Arc::clone(self);
        let peer_name = peer.clone();
        let router = self.router();
        let run_conn = conn.clone();
        tokio::spawn(async move {
            conn::run(peer_name.clone(), transport, run_conn, out_rx, router).await;
            manager.on_conn_end(&peer_name, conn_id);
        });

        conn_id
    }

    fn on_conn_end(&self, peer: &PeerName, conn_id: u64) {
        let lost = {
            let mut peers = self.peers.lock();
            match peers.get_mut(peer) {
                Some(slot) if slot.conn.as_ref().map(|c| c.id) == Some(conn_id) => {
                    slot.conn = None;
                    let _ = slot.connected.send(false);
                    true
                }
                _ => false,
            }
        };
        if lost {
            let _ = self.registry.notify(
                porpulsion_core::NotificationLevel::Warn,
                "channel disconnected",
                format!("channel to {peer} lost, reconnecting"),
            );
        }
    }

    /// Tear down the live channel (if any) without touching the dialer;
    /// the dial loop reconnects with backoff.
    pub fn close_channel(&self, peer: &PeerName) {
        let conn = { self.peers.lock().get(peer).and_then(|s| s.conn.clone()) };
        if let Some(conn) = conn {
            conn.cancel.cancel();
            conn.fail_pending(ChannelError::Down);
        }
    }

    /// Remove a peer entirely: stop the dialer, close the channel, fail
    /// every outstanding send.
    pub fn remove_peer(&self, peer: &PeerName) {
        let slot = self.peers.lock().remove(peer);
        if let Some(slot) = slot {
            if let Some(cancel) = slot.dialer_cancel {
                cancel.cancel();
            }
            if let Some(conn) = slot.conn {
                conn.cancel.cancel();
                conn.fail_pending(ChannelError::Down);
            }
            let _ = slot.connected.send(false);
        }
    }

    // ── Outbound dialing ─────────────────────────────────────────────────

    /// Ensure a slot and a dial loop exist for `peer`.
    pub fn ensure_peer(self: &Arc<Self>, peer: &Peer) {
        let cancel = CancellationToken::new();
        {
            let mut peers = self.peers.lock();
            let slot = peers.entry(peer.name.clone()).or_insert_with(PeerSlot::new);
            if let Some(old) = slot.dialer_cancel.replace(cancel.clone()) {
                old.cancel();
            }
        }
        let manager = Arc::clone(self);
        let peer = peer.clone();
        tokio::spawn(async move {
            manager.dial_loop(peer, cancel).await;
        });
    }

    async fn dial_loop(self: Arc<Self>, peer: Peer, cancel: CancellationToken) {
        let url = peer.channel_url();
        let mut backoff = Backoff::new();
        loop {
            if cancel.is_cancelled() {
                return;
            }

            // An inbound channel may already be live; wait it out instead
            // of racing it.
            if self.is_connected(&peer.name) {
                if self.wait_disconnected(&peer.name, &cancel).await.is_err() {
                    return;
                }
                backoff.reset();
                continue;
            }

            match dial(&url, &self.self_ca_b64).await {
                Ok(transport) => {
                    backoff.reset();
                    let conn_id = self.attach(&peer.name, transport);
                    tracing::info!(peer = %peer.name, conn = conn_id, %url, "outbound channel established");
                    let _ = self.registry.set_peer_status(&peer.name, PeerStatus::Connected, None);
                    if self.wait_disconnected(&peer.name, &cancel).await.is_err() {
                        return;
                    }
                    tracing::info!(peer = %peer.name, conn = conn_id, "channel lost, scheduling reconnect");
                }
                Err(e) => {
                    tracing::debug!(peer = %peer.name, error = %e, "channel dial failed");
                    let _ = self
                        .registry
                        .update_peer(&peer.name, |p| p.last_error = Some(e.to_string()));
                }
            }

            let delay = backoff.next();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Wait until the peer's channel goes down. `Err` means cancelled or
    /// the slot disappeared.
    async fn wait_disconnected(&self, peer: &PeerName, cancel: &CancellationToken) -> Result<(), ()> {
        let Some(mut rx) = self.subscribe(peer) else { return Err(()) };
        loop {
            if !*rx.borrow() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(()),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(());
                    }
                }
            }
        }
    }

    // ── Request / reply / push ───────────────────────────────────────────

    /// Send a request and await its reply, with the default deadline.
    pub async fn send(
        &self,
        peer: &PeerName,
        method: &str,
        payload: Value,
    ) -> Result<Value, ChannelError> {
        self.send_with(peer, method, payload, env::request_timeout(), None).await
    }

    /// Send a request with an explicit deadline and optional cancellation.
    /// Cancellation removes the correlation entry and pushes a `cancel`
    /// event carrying the request id; committed side effects are not
    /// rolled back.
    pub async fn send_with(
        &self,
        peer: &PeerName,
        method: &str,
        payload: Value,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, ChannelError> {
        let conn = {
            self.peers.lock().get(peer).and_then(|s| s.conn.clone())
        }
        .ok_or(ChannelError::Down)?;

        let id = new_request_id();
        let frame = Frame::Request { id: id.clone(), method: method.to_string(), payload };

        let (tx, rx) = oneshot::channel();
        conn.pending.lock().insert(id.clone(), tx);

        if conn.out_tx.send(frame).await.is_err() {
            conn.pending.lock().remove(&id);
            return Err(ChannelError::Down);
        }

        let cancelled = async {
            match &cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            reply = rx => reply.unwrap_or(Err(ChannelError::Down)),
            _ = tokio::time::sleep(timeout) => {
                conn.pending.lock().remove(&id);
                Err(ChannelError::Timeout)
            }
            _ = cancelled => {
                conn.pending.lock().remove(&id);
                conn.push_q.push(Frame::push(method::CANCEL, json!({"id": id})));
                Err(ChannelError::Cancelled)
            }
        }
    }

    /// Fire-and-forget push through the bounded drop-oldest queue. Fails
    /// only when no channel is live.
    pub fn push(&self, peer: &PeerName, event: &str, payload: Value) -> Result<(), ChannelError> {
        let conn =
            { self.peers.lock().get(peer).and_then(|s| s.conn.clone()) }.ok_or(ChannelError::Down)?;
        conn.push_q.push(Frame::push(event, payload));
        Ok(())
    }

    /// Push through the reliable writer queue — suspends under
    /// backpressure instead of dropping. Used for tunnel chunks, where a
    /// dropped frame would corrupt the stream.
    pub async fn push_reliable(
        &self,
        peer: &PeerName,
        event: &str,
        payload: Value,
    ) -> Result<(), ChannelError> {
        let conn =
            { self.peers.lock().get(peer).and_then(|s| s.conn.clone()) }.ok_or(ChannelError::Down)?;
        conn.out_tx.send(Frame::push(event, payload)).await.map_err(|_| ChannelError::Down)
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn is_connected(&self, peer: &PeerName) -> bool {
        self.peers.lock().get(peer).map(|s| s.conn.is_some()).unwrap_or(false)
    }

    pub fn channel_status(&self, peer: &PeerName) -> ChannelStatus {
        if self.is_connected(peer) {
            ChannelStatus::Connected
        } else {
            ChannelStatus::Disconnected
        }
    }

    /// Watch channel connectivity; `true` while a channel is live.
    pub fn subscribe(&self, peer: &PeerName) -> Option<watch::Receiver<bool>> {
        self.peers.lock().get(peer).map(|s| s.connected.subscribe())
    }

    /// Send `peer/goodbye` on every live channel and close them. Used on
    /// clean shutdown.
    pub async fn goodbye_all(&self) {
        let conns: Vec<(PeerName, Conn)> = {
            self.peers
                .lock()
                .iter()
                .filter_map(|(name, slot)| slot.conn.clone().map(|c| (name.clone(), c)))
                .collect()
        };
        for (peer, conn) in conns {
            let _ = conn.out_tx.send(Frame::push(method::PEER_GOODBYE, json!({}))).await;
            tracing::info!(peer = %peer, "sent goodbye");
            conn.cancel.cancel();
            conn.fail_pending(ChannelError::Down);
        }
    }
}

/// Dial the peer's `/ws` endpoint, presenting our CA in `X-Agent-Ca`.
async fn dial(
    url: &str,
    ca_b64: &str,
) -> Result<Transport, Box<tokio_tungstenite::tungstenite::Error>> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url.into_client_request()?;
    let header = ca_b64.parse().map_err(|_| {
        Box::new(tokio_tungstenite::tungstenite::Error::Url(
            tokio_tungstenite::tungstenite::error::UrlError::EmptyHostName,
        ))
    })?;
    request.headers_mut().insert("X-Agent-Ca", header);

    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(Transport::from_tungstenite(ws))
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
