// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent settings.
//!
//! A flat record persisted as JSON. Updates arrive as partial JSON objects
//! from the dashboard and merge field-by-field (last writer wins per field).
//! Quantity-valued fields are validated at merge time so a bad value never
//! reaches admission.

use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("unknown setting {0:?}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Log verbosity, stored in settings and applied to the tracing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// All recognized agent options, with their defaults.
///
/// Comma-separated list fields use the empty string to mean "no filter".
/// Integer caps use 0 to mean unlimited; quantity caps use the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    pub allow_inbound_remoteapps: bool,
    pub require_remoteapp_approval: bool,
    pub allow_inbound_tunnels: bool,
    pub allowed_source_peers: String,
    /// Entries are `peer` or `peer/app-id`.
    pub allowed_tunnel_peers: String,
    pub allowed_images: String,
    pub blocked_images: String,
    pub require_resource_requests: bool,
    pub require_resource_limits: bool,
    pub max_cpu_request_per_pod: String,
    pub max_cpu_limit_per_pod: String,
    pub max_memory_request_per_pod: String,
    pub max_memory_limit_per_pod: String,
    pub max_replicas_per_app: u32,
    pub max_total_deployments: u32,
    pub max_total_pods: u32,
    pub max_total_cpu_requests: String,
    pub max_total_memory_requests: String,
    pub log_level: LogLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_inbound_remoteapps: true,
            require_remoteapp_approval: false,
            allow_inbound_tunnels: true,
            allowed_source_peers: String::new(),
            allowed_tunnel_peers: String::new(),
            allowed_images: String::new(),
            blocked_images: String::new(),
            require_resource_requests: false,
            require_resource_limits: false,
            max_cpu_request_per_pod: String::new(),
            max_cpu_limit_per_pod: String::new(),
            max_memory_request_per_pod: String::new(),
            max_memory_limit_per_pod: String::new(),
            max_replicas_per_app: 0,
            max_total_deployments: 0,
            max_total_pods: 0,
            max_total_cpu_requests: String::new(),
            max_total_memory_requests: String::new(),
            log_level: LogLevel::default(),
        }
    }
}

impl Settings {
    /// Merge a partial JSON object into this record, field-level last
    /// writer wins. Unknown keys and unparseable values are rejected
    /// without applying anything.
    pub fn merge(&self, patch: &serde_json::Value) -> Result<Settings, SettingsError> {
        let obj = patch
            .as_object()
            .ok_or_else(|| SettingsError::InvalidValue {
                key: "<root>".to_string(),
                reason: "expected a JSON object".to_string(),
            })?;

        let mut merged = serde_json::to_value(self).map_err(|e| SettingsError::InvalidValue {
            key: "<root>".to_string(),
            reason: e.to_string(),
        })?;
        let map = match merged.as_object_mut() {
            Some(m) => m,
            None => {
                return Err(SettingsError::InvalidValue {
                    key: "<root>".to_string(),
                    reason: "settings did not serialize to an object".to_string(),
                })
            }
        };
        for (key, value) in obj {
            if !map.contains_key(key) {
                return Err(SettingsError::UnknownKey(key.clone()));
            }
            map.insert(key.clone(), value.clone());
        }

        let next: Settings =
            serde_json::from_value(merged).map_err(|e| SettingsError::InvalidValue {
                key: "<patch>".to_string(),
                reason: e.to_string(),
            })?;
        next.validate()?;
        Ok(next)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (key, value) in [
            ("max_cpu_request_per_pod", &self.max_cpu_request_per_pod),
            ("max_cpu_limit_per_pod", &self.max_cpu_limit_per_pod),
            ("max_memory_request_per_pod", &self.max_memory_request_per_pod),
            ("max_memory_limit_per_pod", &self.max_memory_limit_per_pod),
            ("max_total_cpu_requests", &self.max_total_cpu_requests),
            ("max_total_memory_requests", &self.max_total_memory_requests),
        ] {
            if !value.is_empty() {
                Quantity::parse(value).map_err(|e| SettingsError::InvalidValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    pub fn allowed_source_peers_list(&self) -> Vec<String> {
        csv_list(&self.allowed_source_peers)
    }

    pub fn allowed_tunnel_peers_list(&self) -> Vec<String> {
        csv_list(&self.allowed_tunnel_peers)
    }

    pub fn allowed_images_list(&self) -> Vec<String> {
        csv_list(&self.allowed_images)
    }

    pub fn blocked_images_list(&self) -> Vec<String> {
        csv_list(&self.blocked_images)
    }

    pub fn max_cpu_request_per_pod(&self) -> Option<Quantity> {
        parse_cap(&self.max_cpu_request_per_pod)
    }

    pub fn max_cpu_limit_per_pod(&self) -> Option<Quantity> {
        parse_cap(&self.max_cpu_limit_per_pod)
    }

    pub fn max_memory_request_per_pod(&self) -> Option<Quantity> {
        parse_cap(&self.max_memory_request_per_pod)
    }

    pub fn max_memory_limit_per_pod(&self) -> Option<Quantity> {
        parse_cap(&self.max_memory_limit_per_pod)
    }

    pub fn max_total_cpu_requests(&self) -> Option<Quantity> {
        parse_cap(&self.max_total_cpu_requests)
    }

    pub fn max_total_memory_requests(&self) -> Option<Quantity> {
        parse_cap(&self.max_total_memory_requests)
    }
}

fn parse_cap(value: &str) -> Option<Quantity> {
    if value.is_empty() {
        return None;
    }
    Quantity::parse(value).ok()
}

fn csv_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
