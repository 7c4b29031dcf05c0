// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory canonical store of peers, apps, approvals, settings and
//! notifications.
//!
//! The registry exclusively owns the records; other components read
//! immutable snapshots and issue explicit mutation calls. Every mutation
//! of persisted state is written to its blob before it becomes visible,
//! so a mutation that fails to persist never happened. A monotonically
//! increasing generation counter lets pollers detect change cheaply.

use crate::blob::{Blob, StorageError};
use crate::schema::{PersistedState, SensitiveState};
use parking_lot::Mutex;
use porpulsion_core::{
    notification, AppId, Notification, NotificationLevel, PendingApproval, Peer, PeerName,
    PeerStatus, RemoteApp, Settings,
};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const SENSITIVE_BLOB: &str = "sensitive.json";
const STATE_BLOB: &str = "state.json";

/// Errors from registry mutations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("peer {0:?} already exists")]
    PeerExists(String),
    #[error("fingerprint {fingerprint} already pinned for peer {existing:?}")]
    FingerprintCollision { fingerprint: String, existing: String },
    #[error("peer {0:?} has no pinned CA")]
    PeerWithoutCa(String),
    #[error("unknown peer {0:?}")]
    UnknownPeer(String),
    #[error("unknown app {0}")]
    UnknownApp(String),
    #[error(transparent)]
    Settings(#[from] porpulsion_core::settings::SettingsError),
}

struct Inner {
    sensitive: SensitiveState,
    state: PersistedState,
    /// Executing apps live in memory only; the reconciler rebuilds them.
    executing: HashMap<AppId, RemoteApp>,
    generation: u64,
    sensitive_gen: u64,
    state_gen: u64,
}

/// The canonical state store. Cheap to clone handles via `Arc`.
pub struct StateRegistry {
    inner: Mutex<Inner>,
    sensitive_blob: Blob,
    state_blob: Blob,
}

impl StateRegistry {
    /// Load the registry from `state_dir`, creating empty state on first boot.
    pub fn open(state_dir: &Path) -> Result<Self, RegistryError> {
        let sensitive_blob = Blob::new_secret(state_dir.join(SENSITIVE_BLOB));
        let state_blob = Blob::new(state_dir.join(STATE_BLOB));

        let (sensitive, sensitive_gen) = match sensitive_blob.load::<SensitiveState>()? {
            Some(env) => (env.data, env.generation),
            None => (SensitiveState::default(), 0),
        };
        let (state, state_gen) = match state_blob.load::<PersistedState>()? {
            Some(env) => (env.data, env.generation),
            None => (PersistedState::default(), 0),
        };

        let generation = sensitive_gen.max(state_gen);
        Ok(Self {
            inner: Mutex::new(Inner {
                sensitive,
                state,
                executing: HashMap::new(),
                generation,
                sensitive_gen,
                state_gen,
            }),
            sensitive_blob,
            state_blob,
        })
    }

    /// Monotonic change counter, bumped on every mutation.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    // ── Sensitive blob (credentials + peers) ─────────────────────────────

    /// Snapshot of the sensitive state.
    pub fn sensitive(&self) -> SensitiveState {
        self.inner.lock().sensitive.clone()
    }

    /// Atomically mutate the sensitive blob. The closure runs under the
    /// registry lock and the result is persisted before it becomes visible;
    /// on a disk conflict the state is reloaded and the closure re-applied
    /// once.
    pub fn mutate_sensitive<R>(
        &self,
        mut f: impl FnMut(&mut SensitiveState) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        let mut inner = self.inner.lock();
        for attempt in 0..2 {
            let mut next = inner.sensitive.clone();
            let out = f(&mut next)?;
            if next == inner.sensitive {
                return Ok(out);
            }
            let gen = inner.generation + 1;
            match self.sensitive_blob.save_cas(&next, inner.sensitive_gen, gen) {
                Ok(()) => {
                    inner.sensitive = next;
                    inner.sensitive_gen = gen;
                    inner.generation = gen;
                    return Ok(out);
                }
                Err(StorageError::Conflict { found, .. }) if attempt == 0 => {
                    tracing::warn!(found, "sensitive blob moved on disk, reloading");
                    if let Some(env) = self.sensitive_blob.load::<SensitiveState>()? {
                        inner.sensitive = env.data;
                        inner.sensitive_gen = env.generation;
                        inner.generation = inner.generation.max(env.generation);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::Conflict {
            path: self.sensitive_blob.path().to_path_buf(),
            expected: inner.sensitive_gen,
            found: inner.sensitive_gen,
        }
        .into())
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.inner.lock().sensitive.peers.clone()
    }

    pub fn peer(&self, name: &PeerName) -> Option<Peer> {
        self.inner.lock().sensitive.peers.iter().find(|p| &p.name == name).cloned()
    }

    pub fn peer_by_fingerprint(&self, fingerprint: &str) -> Option<Peer> {
        self.inner
            .lock()
            .sensitive
            .peers
            .iter()
            .find(|p| p.ca_fingerprint == fingerprint)
            .cloned()
    }

    /// Insert a new peer record. Enforces the `(name, ca_fingerprint)`
    /// uniqueness invariant and refuses records without a pinned CA.
    pub fn insert_peer(&self, peer: Peer) -> Result<(), RegistryError> {
        if peer.ca_pem.trim().is_empty() {
            return Err(RegistryError::PeerWithoutCa(peer.name.to_string()));
        }
        self.mutate_sensitive(|s| {
            if s.peers.iter().any(|p| p.name == peer.name) {
                return Err(RegistryError::PeerExists(peer.name.to_string()));
            }
            if let Some(existing) =
                s.peers.iter().find(|p| p.ca_fingerprint == peer.ca_fingerprint)
            {
                return Err(RegistryError::FingerprintCollision {
                    fingerprint: peer.ca_fingerprint.clone(),
                    existing: existing.name.to_string(),
                });
            }
            s.peers.push(peer.clone());
            Ok(())
        })
    }

    /// Apply `f` to the named peer record and persist.
    pub fn update_peer(
        &self,
        name: &PeerName,
        f: impl Fn(&mut Peer),
    ) -> Result<Peer, RegistryError> {
        self.mutate_sensitive(|s| {
            let peer = s
                .peers
                .iter_mut()
                .find(|p| &p.name == name)
                .ok_or_else(|| RegistryError::UnknownPeer(name.to_string()))?;
            f(peer);
            Ok(peer.clone())
        })
    }

    pub fn set_peer_status(
        &self,
        name: &PeerName,
        status: PeerStatus,
        last_error: Option<String>,
    ) -> Result<Peer, RegistryError> {
        self.update_peer(name, |p| {
            p.status = status;
            p.last_error = last_error.clone();
            if status == PeerStatus::Connected {
                p.connected_at = Some(chrono::Utc::now());
            }
        })
    }

    pub fn remove_peer(&self, name: &PeerName) -> Result<Option<Peer>, RegistryError> {
        self.mutate_sensitive(|s| {
            let idx = s.peers.iter().position(|p| &p.name == name);
            Ok(idx.map(|i| s.peers.remove(i)))
        })
    }

    // ── Plain blob (apps, approvals, settings, notifications) ────────────

    fn mutate_state<R>(
        &self,
        mut f: impl FnMut(&mut PersistedState) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        let mut inner = self.inner.lock();
        for attempt in 0..2 {
            let mut next = inner.state.clone();
            let out = f(&mut next)?;
            if next == inner.state {
                return Ok(out);
            }
            let gen = inner.generation + 1;
            match self.state_blob.save_cas(&next, inner.state_gen, gen) {
                Ok(()) => {
                    inner.state = next;
                    inner.state_gen = gen;
                    inner.generation = gen;
                    return Ok(out);
                }
                Err(StorageError::Conflict { found, .. }) if attempt == 0 => {
                    tracing::warn!(found, "state blob moved on disk, reloading");
                    if let Some(env) = self.state_blob.load::<PersistedState>()? {
                        inner.state = env.data;
                        inner.state_gen = env.generation;
                        inner.generation = inner.generation.max(env.generation);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::Conflict {
            path: self.state_blob.path().to_path_buf(),
            expected: inner.state_gen,
            found: inner.state_gen,
        }
        .into())
    }

    pub fn submitted(&self) -> Vec<RemoteApp> {
        self.inner.lock().state.submitted.clone()
    }

    pub fn executing(&self) -> Vec<RemoteApp> {
        let inner = self.inner.lock();
        let mut apps: Vec<_> = inner.executing.values().cloned().collect();
        apps.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        apps
    }

    /// Look up an app on either side.
    pub fn app(&self, id: &AppId) -> Option<RemoteApp> {
        let inner = self.inner.lock();
        inner
            .state
            .submitted
            .iter()
            .find(|a| &a.id == id)
            .cloned()
            .or_else(|| inner.executing.get(id).cloned())
    }

    pub fn insert_submitted(&self, app: RemoteApp) -> Result<(), RegistryError> {
        self.mutate_state(|s| {
            s.submitted.retain(|a| a.id != app.id);
            s.submitted.push(app.clone());
            Ok(())
        })
    }

    pub fn update_submitted(
        &self,
        id: &AppId,
        f: impl Fn(&mut RemoteApp),
    ) -> Result<RemoteApp, RegistryError> {
        self.mutate_state(|s| {
            let app = s
                .submitted
                .iter_mut()
                .find(|a| &a.id == id)
                .ok_or_else(|| RegistryError::UnknownApp(id.to_string()))?;
            f(app);
            Ok(app.clone())
        })
    }

    pub fn remove_submitted(&self, id: &AppId) -> Result<Option<RemoteApp>, RegistryError> {
        self.mutate_state(|s| {
            let idx = s.submitted.iter().position(|a| &a.id == id);
            Ok(idx.map(|i| s.submitted.remove(i)))
        })
    }

    /// Insert or replace an executing app (memory only).
    pub fn insert_executing(&self, app: RemoteApp) {
        let mut inner = self.inner.lock();
        inner.executing.insert(app.id.clone(), app);
        inner.generation += 1;
    }

    pub fn update_executing(
        &self,
        id: &AppId,
        f: impl FnOnce(&mut RemoteApp),
    ) -> Result<RemoteApp, RegistryError> {
        let mut inner = self.inner.lock();
        let app = inner
            .executing
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownApp(id.to_string()))?;
        f(app);
        let out = app.clone();
        inner.generation += 1;
        Ok(out)
    }

    pub fn remove_executing(&self, id: &AppId) -> Option<RemoteApp> {
        let mut inner = self.inner.lock();
        let removed = inner.executing.remove(id);
        if removed.is_some() {
            inner.generation += 1;
        }
        removed
    }

    // ── Approvals ────────────────────────────────────────────────────────

    pub fn approvals(&self) -> Vec<PendingApproval> {
        self.inner.lock().state.pending_approval.clone()
    }

    pub fn enqueue_approval(&self, approval: PendingApproval) -> Result<(), RegistryError> {
        self.mutate_state(|s| {
            s.pending_approval.retain(|a| a.id != approval.id);
            s.pending_approval.push(approval.clone());
            Ok(())
        })
    }

    /// Remove and return a queued approval.
    pub fn take_approval(&self, id: &AppId) -> Result<Option<PendingApproval>, RegistryError> {
        self.mutate_state(|s| {
            let idx = s.pending_approval.iter().position(|a| &a.id == id);
            Ok(idx.map(|i| s.pending_approval.remove(i)))
        })
    }

    // ── Settings ─────────────────────────────────────────────────────────

    pub fn settings(&self) -> Settings {
        self.inner.lock().state.settings.clone()
    }

    /// Merge a partial settings patch (field-level last writer wins).
    pub fn merge_settings(&self, patch: &serde_json::Value) -> Result<Settings, RegistryError> {
        self.mutate_state(|s| {
            let next = s.settings.merge(patch)?;
            s.settings = next.clone();
            Ok(next)
        })
    }

    // ── Notifications ────────────────────────────────────────────────────

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().state.notifications.clone()
    }

    /// Emit a notification into the bounded ring.
    pub fn notify(
        &self,
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Notification, RegistryError> {
        let entry =
            Notification::new(uuid::Uuid::new_v4().to_string(), level, title.into(), message.into());
        let stored = entry.clone();
        self.mutate_state(move |s| {
            notification::push_bounded(&mut s.notifications, stored.clone());
            Ok(())
        })?;
        Ok(entry)
    }

    pub fn ack_notification(&self, id: &str) -> Result<bool, RegistryError> {
        self.mutate_state(|s| {
            match s.notifications.iter_mut().find(|n| n.id == id) {
                Some(n) => {
                    n.ack = true;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    pub fn clear_notifications(&self) -> Result<(), RegistryError> {
        self.mutate_state(|s| {
            s.notifications.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
