// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One live channel connection: frame pump, correlation, keepalive.

use super::transport::{Transport, TransportEvent, TransportSend};
use super::ChannelError;
use crate::router::MessageRouter;
use parking_lot::Mutex;
use porpulsion_core::PeerName;
use porpulsion_wire::{decode, encode, Frame};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(20);
/// Missing two consecutive pongs counts as a transport error.
const IDLE_DEADLINE: Duration = Duration::from_secs(45);
/// How often the idle deadline is checked.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);
/// Push queue bound; the oldest push is dropped on overflow.
const PUSH_QUEUE_DEPTH: usize = 1024;

pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, ChannelError>>>>>;

/// Drop-oldest queue for fire-and-forget pushes. Status is eventually
/// consistent via the reconciler, so losing the oldest push under
/// backpressure is acceptable; tunnel chunks use the reliable path.
pub(crate) struct PushQueue {
    q: Mutex<VecDeque<Frame>>,
    notify: Notify,
}

impl PushQueue {
    pub fn new() -> Self {
        Self { q: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    pub fn push(&self, frame: Frame) {
        {
            let mut q = self.q.lock();
            if q.len() >= PUSH_QUEUE_DEPTH {
                q.pop_front();
                tracing::warn!("push queue full, dropped oldest push");
            }
            q.push_back(frame);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Frame> {
        self.q.lock().pop_front()
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Handle to a live connection, held by the manager.
#[derive(Clone)]
pub(crate) struct Conn {
    pub id: u64,
    pub out_tx: mpsc::Sender<Frame>,
    pub pending: PendingMap,
    pub push_q: Arc<PushQueue>,
    pub cancel: CancellationToken,
}

impl Conn {
    pub fn new(id: u64) -> (Self, mpsc::Receiver<Frame>) {
        let (out_tx, out_rx) = mpsc::channel(64);
        (
            Self {
                id,
                out_tx,
                pending: Arc::new(Mutex::new(HashMap::new())),
                push_q: Arc::new(PushQueue::new()),
                cancel: CancellationToken::new(),
            },
            out_rx,
        )
    }

    /// Fail every outstanding request. Called when the connection ends or
    /// is replaced; no send may complete successfully on the old channel.
    pub fn fail_pending(&self, error: ChannelError) {
        let waiters: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

/// Run the frame pump until the transport closes, the keepalive deadline
/// passes, or the connection is cancelled (replaced / peer removed).
pub(crate) async fn run(
    peer: PeerName,
    transport: Transport,
    conn: Conn,
    mut out_rx: mpsc::Receiver<Frame>,
    router: Arc<MessageRouter>,
) {
    let Transport { tx: sock_tx, rx: mut sock_rx } = transport;
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            event = sock_rx.recv() => {
                last_activity = Instant::now();
                match event {
                    Some(TransportEvent::Text(text)) => {
                        handle_text(&peer, &text, &conn, &router);
                    }
                    Some(TransportEvent::Activity) => {}
                    Some(TransportEvent::Closed) | None => {
                        tracing::info!(peer = %peer, conn = conn.id, "channel transport closed");
                        break;
                    }
                }
            }
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if !write_frame(&peer, &sock_tx, &frame).await {
                    break;
                }
            }
            _ = conn.push_q.wait() => {
                let mut alive = true;
                while let Some(frame) = conn.push_q.pop() {
                    if !write_frame(&peer, &sock_tx, &frame).await {
                        alive = false;
                        break;
                    }
                }
                if !alive {
                    break;
                }
            }
            _ = ping.tick() => {
                if sock_tx.send(TransportSend::Ping).await.is_err() {
                    break;
                }
            }
            _ = watchdog.tick() => {
                if last_activity.elapsed() >= IDLE_DEADLINE {
                    tracing::warn!(peer = %peer, conn = conn.id, "channel idle past pong deadline");
                    break;
                }
            }
            _ = conn.cancel.cancelled() => {
                let _ = sock_tx.send(TransportSend::Close).await;
                break;
            }
        }
    }

    conn.fail_pending(ChannelError::Down);
}

async fn write_frame(
    peer: &PeerName,
    sock_tx: &mpsc::Sender<TransportSend>,
    frame: &Frame,
) -> bool {
    let text = match encode(frame) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "failed to encode frame, dropping");
            return true;
        }
    };
    sock_tx.send(TransportSend::Text(text)).await.is_ok()
}

fn handle_text(peer: &PeerName, text: &str, conn: &Conn, router: &Arc<MessageRouter>) {
    let frame = match decode(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "undecodable frame dropped");
            return;
        }
    };
    match frame {
        Frame::Reply { id, result } => {
            let waiter = conn.pending.lock().remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(result.map_err(ChannelError::Remote));
                }
                None => {
                    tracing::warn!(peer = %peer, %id, "reply without matching request dropped");
                }
            }
        }
        Frame::Request { id, method, payload } => {
            // Handlers may block on Kubernetes or settings I/O; run each
            // request on its own task so the pump keeps draining.
            let router = Arc::clone(router);
            let out_tx = conn.out_tx.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                let reply = match router.dispatch_request(&peer, &method, payload).await {
                    Ok(payload) => Frame::reply_ok(id, payload),
                    Err(error) => Frame::reply_err(id, error),
                };
                let _ = out_tx.send(reply).await;
            });
        }
        Frame::Push { event, payload } => {
            let router = Arc::clone(router);
            let peer = peer.clone();
            tokio::spawn(async move {
                router.dispatch_push(&peer, &event, payload).await;
            });
        }
    }
}
