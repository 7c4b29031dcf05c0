// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dashboard notifications, kept as a bounded ring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum retained notifications; older entries are evicted first.
pub const NOTIFICATION_RING_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationLevel::Info => write!(f, "info"),
            NotificationLevel::Warn => write!(f, "warn"),
            NotificationLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub ack: bool,
}

impl Notification {
    pub fn new(
        id: impl Into<String>,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ts: Utc::now(),
            level,
            title: title.into(),
            message: message.into(),
            ack: false,
        }
    }
}

/// Push onto a notification ring, evicting the oldest entry at capacity.
pub fn push_bounded(ring: &mut Vec<Notification>, notification: Notification) {
    if ring.len() >= NOTIFICATION_RING_CAPACITY {
        ring.remove(0);
    }
    ring.push(notification);
}

#[cfg(test)]
#[path = "notification_tests.rs"]
mod tests;
