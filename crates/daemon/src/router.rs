// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message router: dispatches channel frames to typed handlers.
//!
//! Methods are registered at startup; an unknown request method produces a
//! structured error reply rather than a dropped connection, and an unknown
//! push is logged and dropped. Payload decoding happens at the handler
//! boundary via [`MessageRouter::decode`].

use porpulsion_core::PeerName;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

type RequestFuture = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;
type RequestHandler = Box<dyn Fn(PeerName, Value) -> RequestFuture + Send + Sync>;
type PushFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type PushHandler = Box<dyn Fn(PeerName, Value) -> PushFuture + Send + Sync>;

#[derive(Default)]
pub struct MessageRouter {
    requests: HashMap<String, RequestHandler>,
    pushes: HashMap<String, PushHandler>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler. The handler's `Err` string becomes the
    /// `error` field of the failed reply.
    pub fn on_request<F, Fut>(&mut self, method: &str, handler: F)
    where
        F: Fn(PeerName, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.requests
            .insert(method.to_string(), Box::new(move |peer, payload| Box::pin(handler(peer, payload))));
    }

    /// Register a push handler.
    pub fn on_push<F, Fut>(&mut self, event: &str, handler: F)
    where
        F: Fn(PeerName, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.pushes
            .insert(event.to_string(), Box::new(move |peer, payload| Box::pin(handler(peer, payload))));
    }

    pub async fn dispatch_request(
        &self,
        peer: &PeerName,
        method: &str,
        payload: Value,
    ) -> Result<Value, String> {
        match self.requests.get(method) {
            Some(handler) => handler(peer.clone(), payload).await,
            None => {
                tracing::warn!(peer = %peer, method, "unknown request method");
                Err("unknown type".to_string())
            }
        }
    }

    pub async fn dispatch_push(&self, peer: &PeerName, event: &str, payload: Value) {
        match self.pushes.get(event) {
            Some(handler) => handler(peer.clone(), payload).await,
            None => {
                tracing::warn!(peer = %peer, event, "unknown push event dropped");
            }
        }
    }

    /// Decode a payload at the handler boundary; the error string lands in
    /// the failed reply.
    pub fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, String> {
        serde_json::from_value(payload).map_err(|e| format!("invalid payload: {e}"))
    }

    /// Encode a reply payload.
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Value, String> {
        serde_json::to_value(value).map_err(|e| format!("unencodable reply: {e}"))
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
