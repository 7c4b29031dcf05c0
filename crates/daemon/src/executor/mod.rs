// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor: applies inbound RemoteApp specs to the local Kubernetes API
//! as Deployments and observes them back into app statuses.
//!
//! The executor exclusively owns the mapping from `RemoteApp.id` to a
//! Deployment via the `porpulsion.io/remote-app-id` label. Apply is
//! server-side and idempotent; delete cascades in the foreground and
//! succeeds whether or not the Deployment exists.

mod deployment;

pub use deployment::{
    app_from_deployment, build_deployment, deployment_name, map_status, APP_ID_LABEL,
    NAME_ANNOTATION, SOURCE_PEER_LABEL, SPEC_ANNOTATION,
};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PropagationPolicy};
use parking_lot::Mutex;
use porpulsion_core::{AppId, AppStatus, RemoteApp};
use porpulsion_wire::{LogLine, LogOrder};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const FIELD_MANAGER: &str = "porpulsion";
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
    #[error("deployment for app {0} not found")]
    DeploymentMissing(AppId),
    #[error("no ready pods for app {0}")]
    NoReadyPods(AppId),
}

pub struct Executor {
    deployments: Api<Deployment>,
    pods: Api<Pod>,
    namespace: String,
    /// Round-robin cursors for tunnel pod selection.
    rr: Mutex<HashMap<AppId, usize>>,
}

impl Executor {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            deployments: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            rr: Mutex::new(HashMap::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Create or update the Deployment for `app`. Server-side apply makes
    /// repeat calls with the same spec a no-op.
    pub async fn apply(&self, app: &RemoteApp) -> Result<(), ExecutorError> {
        let deployment = build_deployment(app, &self.namespace);
        let name = deployment_name(app);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let api = &self.deployments;
        let name_ref = &name;
        let params_ref = &params;
        let deployment_ref = &deployment;
        with_retry(|| async move {
            api.patch(name_ref, params_ref, &Patch::Apply(deployment_ref)).await
        })
        .await?;
        tracing::info!(app = %app.id, deployment = %name, "applied deployment");
        Ok(())
    }

    /// Delete the Deployment for `id` with foreground cascade. Succeeds
    /// when nothing exists to delete.
    pub async fn delete(&self, id: &AppId) -> Result<(), ExecutorError> {
        let Some(deployment) = self.find(id).await? else {
            tracing::info!(app = %id, "delete: no deployment, nothing to do");
            return Ok(());
        };
        let Some(name) = deployment.metadata.name else {
            return Ok(());
        };
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };
        match self.deployments.delete(&name, &params).await {
            Ok(_) => {
                tracing::info!(app = %id, deployment = %name, "deleted deployment");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All Deployments this agent manages.
    pub async fn list_managed(&self) -> Result<Vec<Deployment>, ExecutorError> {
        let params = ListParams::default().labels(APP_ID_LABEL);
        Ok(self.deployments.list(&params).await?.items)
    }

    /// The Deployment for one app, if it exists.
    pub async fn find(&self, id: &AppId) -> Result<Option<Deployment>, ExecutorError> {
        let params = ListParams::default().labels(&format!("{APP_ID_LABEL}={id}"));
        Ok(self.deployments.list(&params).await?.items.into_iter().next())
    }

    pub async fn pods_for(&self, id: &AppId) -> Result<Vec<Pod>, ExecutorError> {
        let params = ListParams::default().labels(&format!("{APP_ID_LABEL}={id}"));
        Ok(self.pods.list(&params).await?.items)
    }

    /// Observe the live status of an executing app. `None` means the
    /// Deployment is gone.
    pub async fn observe(
        &self,
        app: &RemoteApp,
    ) -> Result<Option<(AppStatus, Option<String>)>, ExecutorError> {
        let Some(deployment) = self.find(&app.id).await? else {
            return Ok(None);
        };
        let pods = self.pods_for(&app.id).await?;
        let now = chrono::Utc::now();
        Ok(Some(map_status(app, &deployment, &pods, app.updated_at, now)))
    }

    /// Tail logs across the app's pods, merged by pod or by timestamp.
    pub async fn logs(
        &self,
        id: &AppId,
        tail: i64,
        order: LogOrder,
    ) -> Result<Vec<LogLine>, ExecutorError> {
        let pods = self.pods_for(id).await?;
        if pods.is_empty() {
            return Err(ExecutorError::DeploymentMissing(id.clone()));
        }

        let mut lines = Vec::new();
        for pod in &pods {
            let Some(pod_name) = pod.metadata.name.as_deref() else { continue };
            let params = LogParams {
                tail_lines: Some(tail),
                timestamps: true,
                ..Default::default()
            };
            let text = match self.pods.logs(pod_name, &params).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(pod = pod_name, error = %e, "log fetch failed, skipping pod");
                    continue;
                }
            };
            for raw in text.lines() {
                // kubelet prefixes each line with an RFC3339 timestamp.
                let (ts, message) = match raw.split_once(' ') {
                    Some((ts, rest)) => (ts.to_string(), rest.to_string()),
                    None => (String::new(), raw.to_string()),
                };
                lines.push(LogLine { ts, pod: pod_name.to_string(), message });
            }
        }

        match order {
            LogOrder::Pod => lines.sort_by(|a, b| a.pod.cmp(&b.pod).then(a.ts.cmp(&b.ts))),
            // RFC3339 timestamps sort correctly as strings.
            LogOrder::Time => lines.sort_by(|a, b| a.ts.cmp(&b.ts)),
        }
        Ok(lines)
    }

    /// Pick a ready pod IP for the tunnel, round-robin across ready pods.
    pub async fn ready_pod_ip(&self, id: &AppId) -> Result<String, ExecutorError> {
        let pods = self.pods_for(id).await?;
        let ready_ips: Vec<String> = pods
            .iter()
            .filter(|pod| pod_is_ready(pod))
            .filter_map(|pod| pod.status.as_ref().and_then(|s| s.pod_ip.clone()))
            .collect();
        if ready_ips.is_empty() {
            return Err(ExecutorError::NoReadyPods(id.clone()));
        }
        let mut rr = self.rr.lock();
        let cursor = rr.entry(id.clone()).or_insert(0);
        let ip = ready_ips[*cursor % ready_ips.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Ok(ip)
    }

    /// Forget tunnel state for a removed app.
    pub fn forget(&self, id: &AppId) {
        self.rr.lock().remove(id);
    }
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

/// Retry transient Kubernetes failures (conflict, rate-limit, 5xx) with
/// capped exponential backoff; other errors surface immediately.
async fn with_retry<T, F, Fut>(mut call: F) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, kube::Error>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < RETRY_ATTEMPTS && is_transient(&e) => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                tracing::debug!(error = %e, attempt, "transient kubernetes error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(error: &kube::Error) -> bool {
    match error {
        kube::Error::Api(ae) => matches!(ae.code, 409 | 429 | 500 | 502 | 503 | 504),
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}
