// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket-agnostic channel transport.
//!
//! Inbound channels arrive through axum's WebSocket type, outbound ones
//! through tokio-tungstenite. Both are pumped into the same mpsc shape so
//! the channel core (correlation, dedupe, keepalive, backoff) is written
//! once — and so tests can wire two transports back-to-back with no
//! sockets at all.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// Outgoing transport operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSend {
    Text(String),
    Ping,
    Close,
}

/// Incoming transport events. `Activity` covers ping/pong traffic — it
/// feeds the keepalive watchdog without carrying a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Text(String),
    Activity,
    Closed,
}

/// One live socket, reduced to text frames in and out.
pub struct Transport {
    pub tx: mpsc::Sender<TransportSend>,
    pub rx: mpsc::Receiver<TransportEvent>,
}

const PUMP_DEPTH: usize = 64;

impl Transport {
    /// Two transports wired back-to-back in memory. Text crosses over,
    /// pings surface as activity on the far side, close tears both down.
    pub fn pair() -> (Transport, Transport) {
        let (a_send_tx, a_send_rx) = mpsc::channel::<TransportSend>(PUMP_DEPTH);
        let (a_event_tx, a_event_rx) = mpsc::channel::<TransportEvent>(PUMP_DEPTH);
        let (b_send_tx, b_send_rx) = mpsc::channel::<TransportSend>(PUMP_DEPTH);
        let (b_event_tx, b_event_rx) = mpsc::channel::<TransportEvent>(PUMP_DEPTH);

        tokio::spawn(crossover(a_send_rx, b_event_tx.clone(), a_event_tx.clone()));
        tokio::spawn(crossover(b_send_rx, a_event_tx, b_event_tx));

        (
            Transport { tx: a_send_tx, rx: a_event_rx },
            Transport { tx: b_send_tx, rx: b_event_rx },
        )
    }

    /// Pump an outbound tokio-tungstenite stream.
    pub fn from_tungstenite<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Transport
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        use tokio_tungstenite::tungstenite::Message;

        let (mut sink, mut stream) = ws.split();
        let (send_tx, mut send_rx) = mpsc::channel::<TransportSend>(PUMP_DEPTH);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(PUMP_DEPTH);

        tokio::spawn(async move {
            while let Some(op) = send_rx.recv().await {
                let msg = match op {
                    TransportSend::Text(text) => Message::text(text),
                    TransportSend::Ping => Message::Ping(Default::default()),
                    TransportSend::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(TransportEvent::Text(text.as_str().to_owned())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        if event_tx.send(TransportEvent::Activity).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "outbound ws read error");
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {} // binary/frame — ignore
                }
            }
        });

        Transport { tx: send_tx, rx: event_rx }
    }

    /// Pump an inbound axum WebSocket.
    pub fn from_axum(socket: axum::extract::ws::WebSocket) -> Transport {
        use axum::extract::ws::Message;

        let (mut sink, mut stream) = socket.split();
        let (send_tx, mut send_rx) = mpsc::channel::<TransportSend>(PUMP_DEPTH);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(PUMP_DEPTH);

        tokio::spawn(async move {
            while let Some(op) = send_rx.recv().await {
                let msg = match op {
                    TransportSend::Text(text) => Message::Text(text),
                    TransportSend::Ping => Message::Ping(Vec::new()),
                    TransportSend::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(TransportEvent::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        if event_tx.send(TransportEvent::Activity).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "inbound ws read error");
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {} // binary — ignore
                }
            }
        });

        Transport { tx: send_tx, rx: event_rx }
    }
}

async fn crossover(
    mut send_rx: mpsc::Receiver<TransportSend>,
    peer_tx: mpsc::Sender<TransportEvent>,
    self_tx: mpsc::Sender<TransportEvent>,
) {
    loop {
        match send_rx.recv().await {
            Some(TransportSend::Text(text)) => {
                if peer_tx.send(TransportEvent::Text(text)).await.is_err() {
                    break;
                }
            }
            Some(TransportSend::Ping) => {
                // Real sockets auto-reply to pings; model the pong as
                // activity on our own side too.
                let _ = peer_tx.send(TransportEvent::Activity).await;
                if self_tx.send(TransportEvent::Activity).await.is_err() {
                    break;
                }
            }
            Some(TransportSend::Close) | None => {
                let _ = peer_tx.send(TransportEvent::Closed).await;
                break;
            }
        }
    }
}
