// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surfaces.
//!
//! Two listeners: the local dashboard API under `/api` and the
//! peer-facing surface (`POST /peer` for handshakes, `GET /ws` for
//! channel upgrades). Handlers stay thin; the logic lives in the agent
//! context and its components.

mod dashboard;
mod peer;

pub use dashboard::dashboard_router;
pub use peer::peer_router;

use crate::channel::ChannelError;
use crate::context::OpError;
use crate::handshake::HandshakeError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// REST error envelope: `{error, kind}` with a taxonomy-mapped status.
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub error: String,
}

impl ApiError {
    pub fn not_found(error: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, kind: "not_found", error: error.into() }
    }

    pub fn validation(error: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, kind: "validation", error: error.into() }
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, kind: "internal", error: error.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({"error": self.error, "kind": self.kind}));
        (self.status, body).into_response()
    }
}

impl From<OpError> for ApiError {
    fn from(e: OpError) -> Self {
        match e {
            OpError::Validation(msg) => {
                Self { status: StatusCode::BAD_REQUEST, kind: "validation", error: msg }
            }
            OpError::Admission(msg) => {
                Self { status: StatusCode::FORBIDDEN, kind: "admission", error: msg }
            }
            OpError::NotFound(msg) => {
                Self { status: StatusCode::NOT_FOUND, kind: "not_found", error: msg }
            }
            OpError::Transport(ChannelError::Down) | OpError::Transport(ChannelError::Timeout) => {
                Self {
                    status: StatusCode::GATEWAY_TIMEOUT,
                    kind: "transport",
                    error: "channel_down".to_string(),
                }
            }
            OpError::Transport(e) => {
                Self { status: StatusCode::BAD_GATEWAY, kind: "transport", error: e.to_string() }
            }
            OpError::Trust(e) => Self::from_handshake(e),
            OpError::Internal(msg) => {
                Self { status: StatusCode::INTERNAL_SERVER_ERROR, kind: "internal", error: msg }
            }
        }
    }
}

impl ApiError {
    pub fn from_handshake(e: HandshakeError) -> Self {
        let status = match &e {
            HandshakeError::InviteTokenInvalid => StatusCode::UNAUTHORIZED,
            HandshakeError::FingerprintMismatch { .. }
            | HandshakeError::FingerprintCollision { .. }
            | HandshakeError::NameCollision(_) => StatusCode::CONFLICT,
            HandshakeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            HandshakeError::Remote { .. }
            | HandshakeError::Transport(_)
            | HandshakeError::BadCa(_) => StatusCode::BAD_GATEWAY,
            HandshakeError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let kind = match &e {
            HandshakeError::InviteTokenInvalid
            | HandshakeError::FingerprintMismatch { .. }
            | HandshakeError::FingerprintCollision { .. } => "trust",
            HandshakeError::NameCollision(_) => "validation",
            HandshakeError::Timeout | HandshakeError::Remote { .. }
            | HandshakeError::Transport(_) => "transport",
            _ => "internal",
        };
        Self { status, kind, error: e.to_string() }
    }
}
