// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission & quota: the policy pipeline evaluated on every inbound
//! `remoteapp/create` and `remoteapp/spec`.
//!
//! Rules run in a fixed order and the first match wins. Aggregate caps
//! are recomputed from the registry's executing apps (terminal statuses
//! excluded) plus the request under evaluation.

use porpulsion_core::{AppSpec, PeerName, Quantity, RemoteApp, Settings};
use std::fmt;

/// A rejection, rendered as the wire reason string (`image_blocked`,
/// `global_quota_exceeded(deployments)`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InboundDisabled,
    PeerNotAllowed,
    ImageBlocked,
    ImageNotAllowed,
    ResourceRequestRequired(&'static str),
    ResourceLimitRequired(&'static str),
    PerPodQuotaExceeded(&'static str),
    ReplicasExceeded { max: u32 },
    GlobalQuotaExceeded(&'static str),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InboundDisabled => write!(f, "inbound_disabled"),
            Rejection::PeerNotAllowed => write!(f, "peer_not_allowed"),
            Rejection::ImageBlocked => write!(f, "image_blocked"),
            Rejection::ImageNotAllowed => write!(f, "image_not_allowed"),
            Rejection::ResourceRequestRequired(field) => {
                write!(f, "resource_request_required({field})")
            }
            Rejection::ResourceLimitRequired(field) => {
                write!(f, "resource_limit_required({field})")
            }
            Rejection::PerPodQuotaExceeded(field) => write!(f, "per_pod_quota_exceeded({field})"),
            Rejection::ReplicasExceeded { max } => {
                write!(f, "replicas_exceeded(max {max})")
            }
            Rejection::GlobalQuotaExceeded(field) => write!(f, "global_quota_exceeded({field})"),
        }
    }
}

/// Admission outcome for an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admitted {
    /// Run the executor path now.
    Execute,
    /// Queue for operator approval; executor runs on approve.
    QueueForApproval,
}

/// Aggregate consumption of non-terminal executing apps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub deployments: u64,
    pub pods: i64,
    pub cpu_request_milli: i128,
    pub memory_request_milli: i128,
}

/// Sum consumption across executing apps, skipping terminal ones and
/// optionally the app being re-evaluated (spec updates replace their own
/// prior usage).
pub fn current_totals(executing: &[RemoteApp], exclude: Option<&porpulsion_core::AppId>) -> Totals {
    let mut totals = Totals::default();
    for app in executing {
        if app.status.is_terminal() {
            continue;
        }
        if exclude == Some(&app.id) {
            continue;
        }
        totals.deployments += 1;
        let replicas = i64::from(app.spec.replicas.max(0));
        totals.pods += replicas;
        if let Some(cpu) = app.spec.cpu_request() {
            totals.cpu_request_milli += cpu.milli() * i128::from(replicas);
        }
        if let Some(memory) = app.spec.memory_request() {
            totals.memory_request_milli += memory.milli() * i128::from(replicas);
        }
    }
    totals
}

/// Evaluate the admission pipeline. `totals` must already exclude the app
/// under evaluation.
pub fn admit(
    settings: &Settings,
    source_peer: &PeerName,
    spec: &AppSpec,
    totals: &Totals,
) -> Result<Admitted, Rejection> {
    // 1. Inbound apps disabled entirely.
    if !settings.allow_inbound_remoteapps {
        return Err(Rejection::InboundDisabled);
    }

    // 2. Source peer allowlist (empty = all).
    let allowed_peers = settings.allowed_source_peers_list();
    if !allowed_peers.is_empty() && !allowed_peers.iter().any(|p| p == source_peer.as_str()) {
        return Err(Rejection::PeerNotAllowed);
    }

    // 3. Blocked image prefixes.
    if settings.blocked_images_list().iter().any(|prefix| spec.image.starts_with(prefix)) {
        return Err(Rejection::ImageBlocked);
    }

    // 4. Allowed image prefixes (empty = all).
    let allowed_images = settings.allowed_images_list();
    if !allowed_images.is_empty()
        && !allowed_images.iter().any(|prefix| spec.image.starts_with(prefix))
    {
        return Err(Rejection::ImageNotAllowed);
    }

    // 5. Required requests/limits.
    if settings.require_resource_requests {
        if spec.cpu_request().is_none() {
            return Err(Rejection::ResourceRequestRequired("cpu"));
        }
        if spec.memory_request().is_none() {
            return Err(Rejection::ResourceRequestRequired("memory"));
        }
    }
    if settings.require_resource_limits {
        if spec.cpu_limit().is_none() {
            return Err(Rejection::ResourceLimitRequired("cpu"));
        }
        if spec.memory_limit().is_none() {
            return Err(Rejection::ResourceLimitRequired("memory"));
        }
    }

    // 6. Per-pod caps.
    check_per_pod_cap(spec.cpu_request(), settings.max_cpu_request_per_pod(), "max_cpu_request_per_pod")?;
    check_per_pod_cap(spec.cpu_limit(), settings.max_cpu_limit_per_pod(), "max_cpu_limit_per_pod")?;
    check_per_pod_cap(
        spec.memory_request(),
        settings.max_memory_request_per_pod(),
        "max_memory_request_per_pod",
    )?;
    check_per_pod_cap(
        spec.memory_limit(),
        settings.max_memory_limit_per_pod(),
        "max_memory_limit_per_pod",
    )?;

    // 7. Per-app replica cap (0 = unlimited).
    if settings.max_replicas_per_app > 0 && spec.replicas > settings.max_replicas_per_app as i32 {
        return Err(Rejection::ReplicasExceeded { max: settings.max_replicas_per_app });
    }

    // 8. Aggregate caps.
    if settings.max_total_deployments > 0
        && totals.deployments + 1 > u64::from(settings.max_total_deployments)
    {
        return Err(Rejection::GlobalQuotaExceeded("deployments"));
    }
    let replicas = i64::from(spec.replicas.max(0));
    if settings.max_total_pods > 0 && totals.pods + replicas > i64::from(settings.max_total_pods) {
        return Err(Rejection::GlobalQuotaExceeded("pods"));
    }
    if let Some(cap) = settings.max_total_cpu_requests() {
        let requested = spec.cpu_request().map(|q| q.milli()).unwrap_or(0) * i128::from(replicas);
        if totals.cpu_request_milli + requested > cap.milli() {
            return Err(Rejection::GlobalQuotaExceeded("cpu_requests"));
        }
    }
    if let Some(cap) = settings.max_total_memory_requests() {
        let requested =
            spec.memory_request().map(|q| q.milli()).unwrap_or(0) * i128::from(replicas);
        if totals.memory_request_milli + requested > cap.milli() {
            return Err(Rejection::GlobalQuotaExceeded("memory_requests"));
        }
    }

    // 9. Manual approval queue.
    if settings.require_remoteapp_approval {
        return Ok(Admitted::QueueForApproval);
    }

    Ok(Admitted::Execute)
}

fn check_per_pod_cap(
    value: Option<Quantity>,
    cap: Option<Quantity>,
    field: &'static str,
) -> Result<(), Rejection> {
    if let (Some(value), Some(cap)) = (value, cap) {
        if value > cap {
            return Err(Rejection::PerPodQuotaExceeded(field));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "admission_tests.rs"]
mod tests;
