// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel protocol for inter-agent communication.
//!
//! Wire format: one UTF-8 JSON object per WebSocket text message. Three
//! frame kinds — Request (correlated by a 128-bit hex `id`), Reply
//! (same `id`, `ok` flag), and Push (no `id`, fire-and-forget).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod frame;
pub mod method;
mod payload;

pub use frame::{decode, encode, new_request_id, Frame, ProtocolError};
pub use payload::{
    CancelPush, CreateAppReply, CreateAppRequest, DeleteAppRequest, HandshakeReply,
    HandshakeRequest, LogLine, LogOrder, LogsReply, LogsRequest, PingReply, ProxyChunkPush,
    ProxyHttpReply, ProxyHttpRequest, SpecUpdateRequest, StatusPush,
};
