// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Duration as ChronoDuration;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, PodCondition, PodStatus,
};
use porpulsion_core::AppSpec;
use serde_json::json;

fn app(spec_value: serde_json::Value) -> RemoteApp {
    let spec: AppSpec = serde_json::from_value(spec_value).unwrap();
    RemoteApp::executing(AppId::new("a1b2c3d4e5"), "Web Frontend", spec, PeerName::new("east"))
}

fn nginx() -> RemoteApp {
    app(json!({"image": "nginx:1.25", "replicas": 2, "ports": [{"port": 80}]}))
}

fn ready_pod(name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn waiting_pod(name: &str, reason: &str) -> Pod {
    Pod {
        metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
        status: Some(PodStatus {
            container_statuses: Some(vec![ContainerStatus {
                name: "app".to_string(),
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some(reason.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn with_status(mut dep: Deployment, ready: i32, available: i32) -> Deployment {
    dep.metadata.generation = Some(1);
    dep.status = Some(DeploymentStatus {
        ready_replicas: Some(ready),
        available_replicas: Some(available),
        observed_generation: Some(1),
        ..Default::default()
    });
    dep
}

#[test]
fn deployment_name_combines_name_and_id() {
    assert_eq!(deployment_name(&nginx()), "web-frontend-a1b2c3d4");
}

#[test]
fn deployment_name_handles_hostile_names() {
    let mut a = nginx();
    a.name = "!!!".to_string();
    assert_eq!(deployment_name(&a), "app-a1b2c3d4");
}

#[test]
fn build_sets_ownership_labels() {
    let dep = build_deployment(&nginx(), "porpulsion");
    let labels = dep.metadata.labels.unwrap();
    assert_eq!(labels.get(APP_ID_LABEL).unwrap(), "a1b2c3d4e5");
    assert_eq!(labels.get(SOURCE_PEER_LABEL).unwrap(), "east");
    assert_eq!(dep.metadata.namespace.as_deref(), Some("porpulsion"));

    let template_labels =
        dep.spec.as_ref().unwrap().template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
    assert_eq!(template_labels.get(APP_ID_LABEL).unwrap(), "a1b2c3d4e5");

    let selector = dep.spec.unwrap().selector.match_labels.unwrap();
    assert_eq!(selector.get(APP_ID_LABEL).unwrap(), "a1b2c3d4e5");
}

#[test]
fn build_carries_the_spec_annotation() {
    let original = nginx();
    let dep = build_deployment(&original, "default");
    let rebuilt = app_from_deployment(&dep).unwrap();
    assert_eq!(rebuilt.id, original.id);
    assert_eq!(rebuilt.name, original.name);
    assert_eq!(rebuilt.spec, original.spec);
    assert_eq!(rebuilt.source_peer, Some(PeerName::new("east")));
    assert_eq!(rebuilt.status, AppStatus::Creating);
}

#[test]
fn app_from_deployment_without_labels_is_none() {
    let dep = Deployment::default();
    assert!(app_from_deployment(&dep).is_none());
}

#[test]
fn build_maps_container_fields() {
    let a = app(json!({
        "image": "registry.internal/web:1.2",
        "replicas": 1,
        "ports": [{"port": 8080, "name": "http"}],
        "command": ["/bin/server"],
        "args": ["--listen", ":8080"],
        "env": [
            {"name": "MODE", "value": "prod"},
            {"name": "TOKEN", "valueFrom": {"secretKeyRef": {"name": "creds", "key": "token"}}}
        ],
        "imagePullPolicy": "IfNotPresent",
        "imagePullSecrets": ["regcred"],
        "resources": {"requests": {"cpu": "250m", "memory": "128Mi"}},
        "readinessProbe": {"httpGet": {"path": "/ready", "port": 8080}, "periodSeconds": 5},
        "securityContext": {"runAsNonRoot": true, "fsGroup": 2000}
    }));
    let dep = build_deployment(&a, "default");
    let pod_spec = dep.spec.unwrap().template.spec.unwrap();
    let container = &pod_spec.containers[0];

    assert_eq!(container.image.as_deref(), Some("registry.internal/web:1.2"));
    assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
    assert_eq!(container.command.as_ref().unwrap(), &vec!["/bin/server".to_string()]);
    assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));

    let env = container.env.as_ref().unwrap();
    assert_eq!(env[0].value.as_deref(), Some("prod"));
    let secret_ref =
        env[1].value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
    assert_eq!(secret_ref.key, "token");

    let requests = container.resources.as_ref().unwrap().requests.as_ref().unwrap();
    assert_eq!(requests.get("cpu").unwrap().0, "250m");

    let probe = container.readiness_probe.as_ref().unwrap();
    assert_eq!(probe.http_get.as_ref().unwrap().path.as_deref(), Some("/ready"));
    assert_eq!(probe.period_seconds, Some(5));

    assert_eq!(container.security_context.as_ref().unwrap().run_as_non_root, Some(true));
    assert_eq!(pod_spec.security_context.as_ref().unwrap().fs_group, Some(2000));
    assert_eq!(
        pod_spec.image_pull_secrets.as_ref().unwrap()[0].name.as_str(),
        "regcred"
    );
}

#[test]
fn all_replicas_ready_maps_to_ready() {
    let a = nginx();
    let dep = with_status(build_deployment(&a, "default"), 2, 2);
    let pods = vec![ready_pod("p1"), ready_pod("p2")];
    let now = Utc::now();
    let (status, message) = map_status(&a, &dep, &pods, now, now);
    assert_eq!(status, AppStatus::Ready);
    assert_eq!(message.as_deref(), Some("2/2 ready"));
}

#[test]
fn partial_availability_maps_to_running() {
    let a = nginx();
    let dep = with_status(build_deployment(&a, "default"), 1, 1);
    let pods = vec![ready_pod("p1")];
    let now = Utc::now();
    let (status, _) = map_status(&a, &dep, &pods, now, now);
    assert_eq!(status, AppStatus::Running);
}

#[test]
fn no_availability_maps_to_creating() {
    let a = nginx();
    let dep = with_status(build_deployment(&a, "default"), 0, 0);
    let now = Utc::now();
    let (status, _) = map_status(&a, &dep, &[], now, now);
    assert_eq!(status, AppStatus::Creating);
}

#[test]
fn stale_observed_generation_maps_to_creating() {
    let a = nginx();
    let mut dep = with_status(build_deployment(&a, "default"), 2, 2);
    dep.metadata.generation = Some(3);
    let pods = vec![ready_pod("p1"), ready_pod("p2")];
    let now = Utc::now();
    let (status, _) = map_status(&a, &dep, &pods, now, now);
    assert_eq!(status, AppStatus::Creating);
}

#[test]
fn sustained_image_pull_backoff_fails() {
    let a = nginx();
    let dep = with_status(build_deployment(&a, "default"), 0, 0);
    let pods = vec![waiting_pod("p1", "ImagePullBackOff")];
    let now = Utc::now();
    let started = now - ChronoDuration::seconds(90);
    let (status, message) = map_status(&a, &dep, &pods, started, now);
    assert_eq!(status, AppStatus::Failed);
    assert!(message.unwrap().contains("ImagePullBackOff"));
}

#[test]
fn fresh_image_pull_backoff_is_still_creating() {
    let a = nginx();
    let dep = with_status(build_deployment(&a, "default"), 0, 0);
    let pods = vec![waiting_pod("p1", "ImagePullBackOff")];
    let now = Utc::now();
    let started = now - ChronoDuration::seconds(10);
    let (status, _) = map_status(&a, &dep, &pods, started, now);
    assert_eq!(status, AppStatus::Creating);
}

#[test]
fn crash_loop_backoff_fails_with_pod_name() {
    let a = nginx();
    let dep = with_status(build_deployment(&a, "default"), 0, 0);
    let pods = vec![waiting_pod("web-xyz", "CrashLoopBackOff")];
    let now = Utc::now();
    let started = now - ChronoDuration::seconds(120);
    let (status, message) = map_status(&a, &dep, &pods, started, now);
    assert_eq!(status, AppStatus::Failed);
    assert_eq!(message.as_deref(), Some("pod web-xyz: CrashLoopBackOff"));
}

#[test]
fn no_progress_past_deadline_is_timeout() {
    let a = nginx();
    let dep = with_status(build_deployment(&a, "default"), 0, 0);
    let now = Utc::now();
    let started = now - ChronoDuration::seconds(400);
    let (status, _) = map_status(&a, &dep, &[], started, now);
    assert_eq!(status, AppStatus::Timeout);
}

#[test]
fn zero_replicas_is_ready_when_scaled_down() {
    let a = app(json!({"image": "nginx:1.25", "replicas": 0}));
    let mut dep = build_deployment(&a, "default");
    dep.metadata.generation = Some(1);
    dep.status = Some(DeploymentStatus {
        observed_generation: Some(1),
        ..Default::default()
    });
    let now = Utc::now();
    let (status, _) = map_status(&a, &dep, &[], now, now);
    assert_eq!(status, AppStatus::Ready);
}
