// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure construction and observation of Deployments.
//!
//! Everything kube-independent lives here so it can be tested against
//! hand-built objects: spec → Deployment mapping, Deployment + Pods →
//! status mapping, and the label/annotation scheme that ties a Deployment
//! back to its RemoteApp.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, HTTPGetAction, LocalObjectReference,
    ObjectFieldSelector, Pod, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecretKeySelector, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use porpulsion_core::{spec, AppId, AppStatus, PeerName, RemoteApp};
use std::collections::BTreeMap;
use std::time::Duration;

/// Label carrying the RemoteApp id; the executor owns this mapping and the
/// proxy only routes to pods bearing it.
pub const APP_ID_LABEL: &str = "porpulsion.io/remote-app-id";
/// Label naming the peer that submitted the app.
pub const SOURCE_PEER_LABEL: &str = "porpulsion.io/source-peer";
/// Annotation holding the submitted spec as JSON, for reconstruction.
pub const SPEC_ANNOTATION: &str = "porpulsion.io/spec";
/// Annotation holding the operator-chosen app name.
pub const NAME_ANNOTATION: &str = "porpulsion.io/app-name";

/// Container image-level failure states that mark an app `Failed` once
/// sustained past [`FAILURE_GRACE`].
const FAILURE_REASONS: [&str; 6] = [
    "ImagePullBackOff",
    "ErrImagePull",
    "CrashLoopBackOff",
    "CreateContainerError",
    "ContainerCannotRun",
    "RunContainerError",
];
const FAILURE_GRACE: Duration = Duration::from_secs(60);
/// No progress past this deadline marks the app `Timeout`.
const STARTUP_DEADLINE: Duration = Duration::from_secs(300);

/// `<sanitized-name>-<id-prefix>`, a valid DNS-1123 deployment name.
pub fn deployment_name(app: &RemoteApp) -> String {
    let mut name: String = app
        .name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    name.truncate(52);
    let name = name.trim_matches('-');
    let name = if name.is_empty() { "app" } else { name };
    format!("{}-{}", name, app.id.short())
}

/// Map a RemoteApp spec onto a Deployment in `namespace`.
pub fn build_deployment(app: &RemoteApp, namespace: &str) -> Deployment {
    let source_peer =
        app.source_peer.as_ref().map(|p| p.to_string()).unwrap_or_default();

    let labels = BTreeMap::from([
        (APP_ID_LABEL.to_string(), app.id.to_string()),
        (SOURCE_PEER_LABEL.to_string(), source_peer),
    ]);
    let annotations = BTreeMap::from([
        (NAME_ANNOTATION.to_string(), app.name.clone()),
        (
            SPEC_ANNOTATION.to_string(),
            serde_json::to_string(&app.spec).unwrap_or_default(),
        ),
    ]);

    let selector =
        BTreeMap::from([(APP_ID_LABEL.to_string(), app.id.to_string())]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(app)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(app.spec.replicas),
            selector: LabelSelector { match_labels: Some(selector), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(build_pod_spec(app)),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn build_pod_spec(app: &RemoteApp) -> PodSpec {
    let spec = &app.spec;

    let ports: Vec<ContainerPort> = spec
        .ports
        .iter()
        .map(|p| ContainerPort {
            container_port: p.port as i32,
            name: p.name.clone(),
            ..Default::default()
        })
        .collect();

    let env: Vec<EnvVar> = spec.env.iter().map(build_env_var).collect();

    let resources = spec.resources.as_ref().map(|r| ResourceRequirements {
        requests: r.requests.as_ref().map(resource_list),
        limits: r.limits.as_ref().map(resource_list),
        ..Default::default()
    });

    let readiness_probe = spec.readiness_probe.as_ref().map(|p| Probe {
        http_get: p.http_get.as_ref().map(|h| HTTPGetAction {
            path: Some(h.path.clone()),
            port: IntOrString::Int(h.port as i32),
            ..Default::default()
        }),
        exec: p.exec.as_ref().map(|e| ExecAction { command: Some(e.command.clone()) }),
        initial_delay_seconds: p.initial_delay_seconds,
        period_seconds: p.period_seconds,
        failure_threshold: p.failure_threshold,
        ..Default::default()
    });

    let (container_security, pod_security) = match &spec.security_context {
        Some(sc) => (
            Some(SecurityContext {
                run_as_non_root: sc.run_as_non_root,
                run_as_user: sc.run_as_user,
                run_as_group: sc.run_as_group,
                read_only_root_filesystem: sc.read_only_root_filesystem,
                ..Default::default()
            }),
            sc.fs_group.map(|fs_group| PodSecurityContext {
                fs_group: Some(fs_group),
                ..Default::default()
            }),
        ),
        None => (None, None),
    };

    PodSpec {
        containers: vec![Container {
            name: "app".to_string(),
            image: Some(spec.image.clone()),
            ports: if ports.is_empty() { None } else { Some(ports) },
            command: if spec.command.is_empty() { None } else { Some(spec.command.clone()) },
            args: if spec.args.is_empty() { None } else { Some(spec.args.clone()) },
            env: if env.is_empty() { None } else { Some(env) },
            resources,
            image_pull_policy: spec.image_pull_policy.map(|p| p.as_str().to_string()),
            readiness_probe,
            security_context: container_security,
            ..Default::default()
        }],
        image_pull_secrets: if spec.image_pull_secrets.is_empty() {
            None
        } else {
            Some(
                spec.image_pull_secrets
                    .iter()
                    .map(|name| LocalObjectReference { name: name.clone() })
                    .collect(),
            )
        },
        security_context: pod_security,
        ..Default::default()
    }
}

fn build_env_var(env: &spec::EnvVar) -> EnvVar {
    EnvVar {
        name: env.name.clone(),
        value: env.value.clone(),
        value_from: env.value_from.as_ref().map(|src| EnvVarSource {
            secret_key_ref: src.secret_key_ref.as_ref().map(|r| SecretKeySelector {
                name: r.name.clone(),
                key: r.key.clone(),
                ..Default::default()
            }),
            config_map_key_ref: src.config_map_key_ref.as_ref().map(|r| {
                k8s_openapi::api::core::v1::ConfigMapKeySelector {
                    name: r.name.clone(),
                    key: r.key.clone(),
                    ..Default::default()
                }
            }),
            field_ref: src.field_ref.as_ref().map(|r| ObjectFieldSelector {
                field_path: r.field_path.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

fn resource_list(list: &spec::ResourceList) -> BTreeMap<String, K8sQuantity> {
    let mut out = BTreeMap::new();
    if let Some(cpu) = &list.cpu {
        out.insert("cpu".to_string(), K8sQuantity(cpu.clone()));
    }
    if let Some(memory) = &list.memory {
        out.insert("memory".to_string(), K8sQuantity(memory.clone()));
    }
    out
}

/// Rebuild an executing RemoteApp record from a labelled Deployment, e.g.
/// after an agent restart. Returns `None` when the labels or the spec
/// annotation are missing or unparseable.
pub fn app_from_deployment(deployment: &Deployment) -> Option<RemoteApp> {
    let labels = deployment.metadata.labels.as_ref()?;
    let annotations = deployment.metadata.annotations.as_ref()?;
    let id = AppId::new(labels.get(APP_ID_LABEL)?.clone());
    let source_peer = PeerName::new(labels.get(SOURCE_PEER_LABEL)?.clone());
    let name = annotations
        .get(NAME_ANNOTATION)
        .cloned()
        .unwrap_or_else(|| id.to_string());
    let spec = serde_json::from_str(annotations.get(SPEC_ANNOTATION)?).ok()?;

    let mut app = RemoteApp::executing(id, name, spec, source_peer);
    if let Some(created) = &deployment.metadata.creation_timestamp {
        app.created_at = created.0;
        app.updated_at = created.0;
    }
    app.set_status(AppStatus::Creating, Some("reconstructed from deployment".to_string()));
    Some(app)
}

/// Map live Deployment + Pod state onto an app status.
///
/// `last_transition` is when the record last changed status; it anchors
/// the failure-grace and startup-deadline clocks.
pub fn map_status(
    app: &RemoteApp,
    deployment: &Deployment,
    pods: &[Pod],
    last_transition: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (AppStatus, Option<String>) {
    let desired = app.spec.replicas.max(0);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    // Sustained container failures win over everything else.
    if let Some((pod, reason)) = first_failing_pod(pods, last_transition, now) {
        return (AppStatus::Failed, Some(format!("pod {pod}: {reason}")));
    }

    let generation = deployment.metadata.generation;
    let observed = status.and_then(|s| s.observed_generation);
    let stale = matches!((generation, observed), (Some(g), Some(o)) if o < g)
        || (generation.is_some() && observed.is_none());

    if !stale && ready == desired && all_pods_ready(pods, desired) {
        return (AppStatus::Ready, Some(format!("{ready}/{desired} ready")));
    }

    if available > 0 {
        return (AppStatus::Running, Some(format!("{ready}/{desired} ready")));
    }

    let waited = (now - last_transition).to_std().unwrap_or_default();
    if waited > STARTUP_DEADLINE {
        return (
            AppStatus::Timeout,
            Some(format!("no progress after {}s", STARTUP_DEADLINE.as_secs())),
        );
    }

    (AppStatus::Creating, Some(format!("{ready}/{desired} ready")))
}

fn all_pods_ready(pods: &[Pod], desired: i32) -> bool {
    if desired == 0 {
        return true;
    }
    let ready = pods
        .iter()
        .filter(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .map(|conds| {
                    conds.iter().any(|c| c.type_ == "Ready" && c.status == "True")
                })
                .unwrap_or(false)
        })
        .count();
    ready >= desired as usize
}

fn first_failing_pod(
    pods: &[Pod],
    last_transition: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<(String, String)> {
    let sustained = (now - last_transition).to_std().unwrap_or_default() > FAILURE_GRACE;
    if !sustained {
        return None;
    }
    for pod in pods {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let statuses = pod.status.as_ref().and_then(|s| s.container_statuses.as_ref());
        let Some(statuses) = statuses else { continue };
        for cs in statuses {
            if let Some(waiting) = cs.state.as_ref().and_then(|s| s.waiting.as_ref()) {
                if let Some(reason) = &waiting.reason {
                    if FAILURE_REASONS.contains(&reason.as_str()) {
                        return Some((name, reason.clone()));
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "deployment_tests.rs"]
mod tests;
