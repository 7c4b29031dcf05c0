// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic file-backed JSON blobs.
//!
//! Writes go to a temp file in the same directory followed by a rename, so
//! a crash never leaves a truncated blob. The previous contents rotate
//! through up to three `.bak` files. Each blob carries a schema version
//! and a generation counter; `save_cas` refuses to clobber a blob whose
//! on-disk generation moved under us.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current blob schema version
pub const CURRENT_BLOB_VERSION: u32 = 1;

const MAX_BAK_FILES: u32 = 3;

/// Errors from blob operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("blob {path} has unsupported version {found}")]
    UnsupportedVersion { path: PathBuf, found: u32 },
    #[error("blob {path} changed on disk (expected generation {expected}, found {found})")]
    Conflict { path: PathBuf, expected: u64, found: u64 },
}

/// A blob of state identified by schema version and generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Schema version for migrations
    #[serde(rename = "v")]
    pub version: u32,
    /// Monotonic write counter
    pub generation: u64,
    pub data: T,
}

/// One on-disk blob. `secret` blobs are written with mode 0o600.
#[derive(Debug, Clone)]
pub struct Blob {
    path: PathBuf,
    secret: bool,
}

impl Blob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), secret: false }
    }

    pub fn new_secret(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), secret: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the blob, or `None` if it does not exist yet.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<Envelope<T>>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope<T> = serde_json::from_str(&text)?;
        if envelope.version > CURRENT_BLOB_VERSION {
            return Err(StorageError::UnsupportedVersion {
                path: self.path.clone(),
                found: envelope.version,
            });
        }
        Ok(Some(envelope))
    }

    /// Atomically replace the blob with `data` at `generation`.
    pub fn save<T: Serialize>(&self, data: &T, generation: u64) -> Result<(), StorageError> {
        let envelope = Envelope { version: CURRENT_BLOB_VERSION, generation, data };
        let text = serde_json::to_string_pretty(&envelope)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if self.path.exists() {
            let bak = rotate_bak_path(&self.path);
            let _ = fs::copy(&self.path, bak);
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = open_for_write(&tmp, self.secret)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Compare-and-swap save: fails with [`StorageError::Conflict`] when the
    /// on-disk generation is not `expected`. Guards against a second writer
    /// (another process pointed at the same state dir).
    pub fn save_cas<T: Serialize + DeserializeOwned>(
        &self,
        data: &T,
        expected: u64,
        next: u64,
    ) -> Result<(), StorageError> {
        if let Some(on_disk) = self.load::<serde_json::Value>()? {
            if on_disk.generation != expected {
                return Err(StorageError::Conflict {
                    path: self.path.clone(),
                    expected,
                    found: on_disk.generation,
                });
            }
        }
        self.save(data, next)
    }
}

fn open_for_write(path: &Path, secret: bool) -> Result<fs::File, StorageError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if secret {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = secret;
    Ok(options.open(path)?)
}

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "blob_tests.rs"]
mod tests;
