// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use porpulsion_core::{AppId, RemoteApp};
use serde_json::json;

fn settings(patch: serde_json::Value) -> Settings {
    Settings::default().merge(&patch).unwrap()
}

fn spec(value: serde_json::Value) -> AppSpec {
    serde_json::from_value(value).unwrap()
}

fn nginx() -> AppSpec {
    spec(json!({"image": "nginx:1.25", "replicas": 2}))
}

fn peer() -> PeerName {
    PeerName::new("a")
}

fn executing(id: &str, spec_value: serde_json::Value) -> RemoteApp {
    RemoteApp::executing(AppId::new(id), id, spec(spec_value), peer())
}

#[test]
fn default_settings_admit() {
    let out = admit(&Settings::default(), &peer(), &nginx(), &Totals::default());
    assert_eq!(out, Ok(Admitted::Execute));
}

#[test]
fn inbound_disabled_wins_over_everything() {
    let s = settings(json!({
        "allow_inbound_remoteapps": false,
        "blocked_images": "nginx"
    }));
    // Rule 1 fires before rule 3.
    assert_eq!(admit(&s, &peer(), &nginx(), &Totals::default()), Err(Rejection::InboundDisabled));
}

#[test]
fn peer_allowlist_rejects_unlisted() {
    let s = settings(json!({"allowed_source_peers": "east,west"}));
    assert_eq!(admit(&s, &peer(), &nginx(), &Totals::default()), Err(Rejection::PeerNotAllowed));
    assert_eq!(admit(&s, &PeerName::new("east"), &nginx(), &Totals::default()), Ok(Admitted::Execute));
}

#[test]
fn blocked_images_match_by_prefix() {
    let s = settings(json!({"blocked_images": "nginx,busybox"}));
    assert_eq!(admit(&s, &peer(), &nginx(), &Totals::default()), Err(Rejection::ImageBlocked));
}

#[test]
fn blocked_wins_over_allowed() {
    let s = settings(json!({"blocked_images": "nginx", "allowed_images": "nginx"}));
    assert_eq!(admit(&s, &peer(), &nginx(), &Totals::default()), Err(Rejection::ImageBlocked));
}

#[test]
fn allowlist_rejects_unlisted_image() {
    let s = settings(json!({"allowed_images": "registry.internal/"}));
    assert_eq!(admit(&s, &peer(), &nginx(), &Totals::default()), Err(Rejection::ImageNotAllowed));
    let internal = spec(json!({"image": "registry.internal/web:1"}));
    assert_eq!(admit(&s, &peer(), &internal, &Totals::default()), Ok(Admitted::Execute));
}

#[test]
fn missing_requests_rejected_when_required() {
    let s = settings(json!({"require_resource_requests": true}));
    assert_eq!(
        admit(&s, &peer(), &nginx(), &Totals::default()),
        Err(Rejection::ResourceRequestRequired("cpu"))
    );
    let with_cpu = spec(json!({
        "image": "nginx:1.25",
        "resources": {"requests": {"cpu": "100m"}}
    }));
    assert_eq!(
        admit(&s, &peer(), &with_cpu, &Totals::default()),
        Err(Rejection::ResourceRequestRequired("memory"))
    );
    let full = spec(json!({
        "image": "nginx:1.25",
        "resources": {"requests": {"cpu": "100m", "memory": "64Mi"}}
    }));
    assert_eq!(admit(&s, &peer(), &full, &Totals::default()), Ok(Admitted::Execute));
}

#[test]
fn missing_limits_rejected_when_required() {
    let s = settings(json!({"require_resource_limits": true}));
    assert_eq!(
        admit(&s, &peer(), &nginx(), &Totals::default()),
        Err(Rejection::ResourceLimitRequired("cpu"))
    );
}

#[test]
fn per_pod_cpu_cap() {
    let s = settings(json!({"max_cpu_request_per_pod": "500m"}));
    let big = spec(json!({
        "image": "nginx:1.25",
        "resources": {"requests": {"cpu": "1"}}
    }));
    assert_eq!(
        admit(&s, &peer(), &big, &Totals::default()),
        Err(Rejection::PerPodQuotaExceeded("max_cpu_request_per_pod"))
    );
    let ok = spec(json!({
        "image": "nginx:1.25",
        "resources": {"requests": {"cpu": "500m"}}
    }));
    assert_eq!(admit(&s, &peer(), &ok, &Totals::default()), Ok(Admitted::Execute));
}

#[test]
fn per_pod_memory_limit_cap() {
    let s = settings(json!({"max_memory_limit_per_pod": "1Gi"}));
    let big = spec(json!({
        "image": "nginx:1.25",
        "resources": {"limits": {"memory": "2Gi"}}
    }));
    assert_eq!(
        admit(&s, &peer(), &big, &Totals::default()),
        Err(Rejection::PerPodQuotaExceeded("max_memory_limit_per_pod"))
    );
}

#[test]
fn replica_cap() {
    let s = settings(json!({"max_replicas_per_app": 3}));
    let four = spec(json!({"image": "nginx:1.25", "replicas": 4}));
    assert_eq!(
        admit(&s, &peer(), &four, &Totals::default()),
        Err(Rejection::ReplicasExceeded { max: 3 })
    );
    let three = spec(json!({"image": "nginx:1.25", "replicas": 3}));
    assert_eq!(admit(&s, &peer(), &three, &Totals::default()), Ok(Admitted::Execute));
}

#[test]
fn third_deployment_crosses_the_cap() {
    let s = settings(json!({"max_total_deployments": 2}));
    let running =
        vec![executing("one", json!({"image": "a:1"})), executing("two", json!({"image": "b:1"}))];
    let totals = current_totals(&running, None);
    assert_eq!(
        admit(&s, &peer(), &nginx(), &totals),
        Err(Rejection::GlobalQuotaExceeded("deployments"))
    );
}

#[test]
fn terminal_apps_do_not_count() {
    let s = settings(json!({"max_total_deployments": 2}));
    let mut failed = executing("one", json!({"image": "a:1"}));
    failed.set_status(porpulsion_core::AppStatus::Failed, None);
    let running = vec![failed, executing("two", json!({"image": "b:1"}))];
    let totals = current_totals(&running, None);
    assert_eq!(admit(&s, &peer(), &nginx(), &totals), Ok(Admitted::Execute));
}

#[test]
fn pod_cap_counts_replicas() {
    let s = settings(json!({"max_total_pods": 4}));
    let running = vec![executing("one", json!({"image": "a:1", "replicas": 3}))];
    let totals = current_totals(&running, None);
    // 3 existing + 2 requested > 4
    assert_eq!(admit(&s, &peer(), &nginx(), &totals), Err(Rejection::GlobalQuotaExceeded("pods")));
}

#[test]
fn aggregate_cpu_cap_sums_replicas() {
    let s = settings(json!({"max_total_cpu_requests": "2"}));
    let running = vec![executing(
        "one",
        json!({"image": "a:1", "replicas": 2, "resources": {"requests": {"cpu": "500m"}}}),
    )];
    let totals = current_totals(&running, None);
    assert_eq!(totals.cpu_request_milli, 1000);
    // 1 core used + 2×750m requested = 2.5 > 2
    let big = spec(json!({
        "image": "nginx:1.25",
        "replicas": 2,
        "resources": {"requests": {"cpu": "750m"}}
    }));
    assert_eq!(
        admit(&s, &peer(), &big, &totals),
        Err(Rejection::GlobalQuotaExceeded("cpu_requests"))
    );
    // 1 + 2×500m = 2, exactly at the cap: allowed.
    let fits = spec(json!({
        "image": "nginx:1.25",
        "replicas": 2,
        "resources": {"requests": {"cpu": "500m"}}
    }));
    assert_eq!(admit(&s, &peer(), &fits, &totals), Ok(Admitted::Execute));
}

#[test]
fn spec_update_excludes_own_usage() {
    let running = vec![executing("one", json!({"image": "a:1", "replicas": 3}))];
    let totals = current_totals(&running, Some(&AppId::new("one")));
    assert_eq!(totals.deployments, 0);
    assert_eq!(totals.pods, 0);
}

#[test]
fn approval_queue_comes_after_quota() {
    let s = settings(json!({
        "require_remoteapp_approval": true,
        "max_total_deployments": 1
    }));
    let running = vec![executing("one", json!({"image": "a:1"}))];
    let totals = current_totals(&running, None);
    // Quota rejection beats the approval queue.
    assert_eq!(
        admit(&s, &peer(), &nginx(), &totals),
        Err(Rejection::GlobalQuotaExceeded("deployments"))
    );
    // Under quota, the request queues.
    assert_eq!(
        admit(&s, &peer(), &nginx(), &Totals::default()),
        Ok(Admitted::QueueForApproval)
    );
}

#[test]
fn rejection_reason_strings() {
    assert_eq!(Rejection::ImageNotAllowed.to_string(), "image_not_allowed");
    assert_eq!(
        Rejection::GlobalQuotaExceeded("deployments").to_string(),
        "global_quota_exceeded(deployments)"
    );
    assert_eq!(
        Rejection::PerPodQuotaExceeded("max_cpu_request_per_pod").to_string(),
        "per_pod_quota_exceeded(max_cpu_request_per_pod)"
    );
}
