// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame encoding and decoding.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from frame encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no type")]
    MissingType,
    #[error("reply frame has no id")]
    ReplyWithoutId,
    #[error("reply frame has no ok flag")]
    ReplyWithoutOk,
    #[error("failed reply carries no error")]
    ReplyWithoutError,
}

/// One message on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Correlated request; the peer owes exactly one reply with the same id.
    Request { id: String, method: String, payload: Value },
    /// Reply to a request. `Err` carries the remote error string.
    Reply { id: String, result: Result<Value, String> },
    /// Fire-and-forget event.
    Push { event: String, payload: Value },
}

impl Frame {
    pub fn request(method: impl Into<String>, payload: Value) -> Self {
        Frame::Request { id: new_request_id(), method: method.into(), payload }
    }

    pub fn reply_ok(id: impl Into<String>, payload: Value) -> Self {
        Frame::Reply { id: id.into(), result: Ok(payload) }
    }

    pub fn reply_err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Frame::Reply { id: id.into(), result: Err(error.into()) }
    }

    pub fn push(event: impl Into<String>, payload: Value) -> Self {
        Frame::Push { event: event.into(), payload }
    }
}

/// Generate a 128-bit random request id, hex encoded.
pub fn new_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// On-the-wire shape shared by all three frame kinds.
#[derive(Serialize, Deserialize)]
struct RawFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Encode a frame to its JSON text representation.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    let raw = match frame {
        Frame::Request { id, method, payload } => RawFrame {
            id: Some(id.clone()),
            kind: method.clone(),
            ok: None,
            payload: Some(payload.clone()),
            error: None,
        },
        Frame::Reply { id, result } => match result {
            Ok(payload) => RawFrame {
                id: Some(id.clone()),
                kind: "reply".to_string(),
                ok: Some(true),
                payload: Some(payload.clone()),
                error: None,
            },
            Err(error) => RawFrame {
                id: Some(id.clone()),
                kind: "reply".to_string(),
                ok: Some(false),
                payload: None,
                error: Some(error.clone()),
            },
        },
        Frame::Push { event, payload } => RawFrame {
            id: None,
            kind: event.clone(),
            ok: None,
            payload: Some(payload.clone()),
            error: None,
        },
    };
    Ok(serde_json::to_string(&raw)?)
}

/// Decode one JSON text message into a frame.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    if raw.kind.is_empty() {
        return Err(ProtocolError::MissingType);
    }
    if raw.kind == "reply" {
        let id = raw.id.ok_or(ProtocolError::ReplyWithoutId)?;
        let ok = raw.ok.ok_or(ProtocolError::ReplyWithoutOk)?;
        let result = if ok {
            Ok(raw.payload.unwrap_or(Value::Null))
        } else {
            Err(raw.error.ok_or(ProtocolError::ReplyWithoutError)?)
        };
        return Ok(Frame::Reply { id, result });
    }
    match raw.id {
        Some(id) => Ok(Frame::Request {
            id,
            method: raw.kind,
            payload: raw.payload.unwrap_or(Value::Null),
        }),
        None => Ok(Frame::Push { event: raw.kind, payload: raw.payload.unwrap_or(Value::Null) }),
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
