// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! porpulsion-storage: durable state for the agent.
//!
//! Two blobs on disk — a *sensitive* one (keypairs, invite token, pinned
//! peer CAs) and a *plain* one (apps, approvals, settings, notifications) —
//! plus the in-memory state registry that owns the canonical records and
//! persists every mutation synchronously. Executing apps are deliberately
//! not persisted: the reconciler rebuilds them from labelled Deployments.

mod blob;
mod registry;
mod schema;

pub use blob::{Blob, Envelope, StorageError, CURRENT_BLOB_VERSION};
pub use registry::{RegistryError, StateRegistry};
pub use schema::{PersistedState, SensitiveState};
