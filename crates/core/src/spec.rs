// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The RemoteApp workload spec.
//!
//! This is the unit of exchange between agents: the submitter validates it
//! before sending, the executor validates it again on arrival and maps it
//! onto a Deployment. Unknown fields are rejected at the serde boundary so
//! a newer peer cannot smuggle settings an older executor would ignore.

use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for an [`AppSpec`]. Surfaced to REST callers as 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("image is required")]
    MissingImage,
    #[error("replicas must be >= 0")]
    NegativeReplicas,
    #[error("port {0} out of range 1..65535")]
    PortOutOfRange(i64),
    #[error("port name {0:?} exceeds 15 characters")]
    PortNameTooLong(String),
    #[error("invalid {field} quantity: {reason}")]
    BadQuantity { field: &'static str, reason: String },
    #[error("env var name must not be empty")]
    EmptyEnvName,
    #[error("env var {0:?} must set exactly one of value or valueFrom")]
    EnvValueConflict(String),
    #[error("env var {0:?} valueFrom must name exactly one source")]
    EnvSourceConflict(String),
    #[error("readinessProbe must set exactly one of httpGet or exec")]
    ProbeConflict,
}

/// One unit of cross-cluster workload, as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AppSpec {
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<ImagePullPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ReadinessProbe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerPort {
    pub port: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ResourceList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "valueFrom", default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVarSource {
    #[serde(rename = "secretKeyRef", default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,
    #[serde(rename = "configMapKeyRef", default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,
    #[serde(rename = "fieldRef", default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<FieldSelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeySelector {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSelector {
    #[serde(rename = "fieldPath")]
    pub field_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    Always,
    IfNotPresent,
    Never,
}

impl ImagePullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImagePullPolicy::Always => "Always",
            ImagePullPolicy::IfNotPresent => "IfNotPresent",
            ImagePullPolicy::Never => "Never",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReadinessProbe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetProbe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecProbe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpGetProbe {
    pub path: String,
    pub port: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecProbe {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_root_filesystem: Option<bool>,
}

impl AppSpec {
    /// Field-level validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.image.trim().is_empty() {
            return Err(SpecError::MissingImage);
        }
        if self.replicas < 0 {
            return Err(SpecError::NegativeReplicas);
        }
        for p in &self.ports {
            if !(1..=65535).contains(&p.port) {
                return Err(SpecError::PortOutOfRange(p.port));
            }
            if let Some(name) = &p.name {
                if name.len() > 15 {
                    return Err(SpecError::PortNameTooLong(name.clone()));
                }
            }
        }
        if let Some(res) = &self.resources {
            validate_resource_list(res.requests.as_ref(), "requests")?;
            validate_resource_list(res.limits.as_ref(), "limits")?;
        }
        for env in &self.env {
            if env.name.is_empty() {
                return Err(SpecError::EmptyEnvName);
            }
            match (&env.value, &env.value_from) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => return Err(SpecError::EnvValueConflict(env.name.clone())),
            }
            if let Some(src) = &env.value_from {
                let sources = usize::from(src.secret_key_ref.is_some())
                    + usize::from(src.config_map_key_ref.is_some())
                    + usize::from(src.field_ref.is_some());
                if sources != 1 {
                    return Err(SpecError::EnvSourceConflict(env.name.clone()));
                }
            }
        }
        if let Some(probe) = &self.readiness_probe {
            let handlers = usize::from(probe.http_get.is_some()) + usize::from(probe.exec.is_some());
            if handlers != 1 {
                return Err(SpecError::ProbeConflict);
            }
            if let Some(http) = &probe.http_get {
                if !(1..=65535).contains(&http.port) {
                    return Err(SpecError::PortOutOfRange(http.port));
                }
            }
        }
        Ok(())
    }

    /// Parsed `requests.cpu`, when present and valid.
    pub fn cpu_request(&self) -> Option<Quantity> {
        self.resource(|r| r.requests.as_ref(), |l| l.cpu.as_deref())
    }

    pub fn cpu_limit(&self) -> Option<Quantity> {
        self.resource(|r| r.limits.as_ref(), |l| l.cpu.as_deref())
    }

    pub fn memory_request(&self) -> Option<Quantity> {
        self.resource(|r| r.requests.as_ref(), |l| l.memory.as_deref())
    }

    pub fn memory_limit(&self) -> Option<Quantity> {
        self.resource(|r| r.limits.as_ref(), |l| l.memory.as_deref())
    }

    fn resource(
        &self,
        list: impl Fn(&Resources) -> Option<&ResourceList>,
        field: impl Fn(&ResourceList) -> Option<&str>,
    ) -> Option<Quantity> {
        self.resources
            .as_ref()
            .and_then(|r| list(r))
            .and_then(|l| field(l))
            .and_then(|s| Quantity::parse(s).ok())
    }
}

fn validate_resource_list(
    list: Option<&ResourceList>,
    which: &'static str,
) -> Result<(), SpecError> {
    let Some(list) = list else { return Ok(()) };
    if let Some(cpu) = &list.cpu {
        Quantity::parse(cpu).map_err(|e| SpecError::BadQuantity {
            field: if which == "requests" { "requests.cpu" } else { "limits.cpu" },
            reason: e.to_string(),
        })?;
    }
    if let Some(memory) = &list.memory {
        Quantity::parse(memory).map_err(|e| SpecError::BadQuantity {
            field: if which == "requests" { "requests.memory" } else { "limits.memory" },
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "spec_tests.rs"]
mod tests;
