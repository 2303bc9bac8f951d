//! Coordinator Service
//!
//! The authoritative copy of the directory. Serves its file table, block
//! signatures and deltas, and applies patches from watching nodes under the
//! path's lock. Tombstones are enforced here so that a node holding a stale
//! copy cannot resurrect a deleted file.

use crate::concurrency::{LockSettings, PathLockManager};
use crate::diff::{delta_file, patch_file, signature_file, Delta, Signature, DEFAULT_BLOCK_SIZE};
use crate::error::SyncError;
use crate::paths::RelPath;
use crate::table::{build_table, RemoteTable};
use crate::tombstone::TombstoneStore;
use crate::types::{now_millis, Millis};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Operations a watching node may invoke on the coordinator.
///
/// Signatures and deltas travel as encoded bytes so the same contract serves
/// an in-process service and a network client.
pub trait Coordinator: Send + Sync {
    /// Block signature of the coordinator's copy; empty if it has none.
    fn get_signature(&self, path: &RelPath) -> Result<Vec<u8>, SyncError>;

    /// Delta turning content with `signature` into the coordinator's copy.
    fn get_delta(&self, path: &RelPath, signature: &[u8]) -> Result<Vec<u8>, SyncError>;

    /// Patch the coordinator's copy; `false` if it was refused or did not verify.
    fn apply_patch(&self, path: &RelPath, delta: &[u8], source_modified_at: Millis) -> Result<bool, SyncError>;

    fn list_file_table(&self) -> Result<RemoteTable, SyncError>;

    /// Replace the live file with a tombstone; `false` if nothing was live.
    fn delete_path(&self, path: &RelPath) -> Result<bool, SyncError>;
}

impl<T: Coordinator + ?Sized> Coordinator for Arc<T> {
    fn get_signature(&self, path: &RelPath) -> Result<Vec<u8>, SyncError> {
        (**self).get_signature(path)
    }

    fn get_delta(&self, path: &RelPath, signature: &[u8]) -> Result<Vec<u8>, SyncError> {
        (**self).get_delta(path, signature)
    }

    fn apply_patch(&self, path: &RelPath, delta: &[u8], source_modified_at: Millis) -> Result<bool, SyncError> {
        (**self).apply_patch(path, delta, source_modified_at)
    }

    fn list_file_table(&self) -> Result<RemoteTable, SyncError> {
        (**self).list_file_table()
    }

    fn delete_path(&self, path: &RelPath) -> Result<bool, SyncError> {
        (**self).delete_path(path)
    }
}

/// Settings for a coordinator rooted at one directory.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub block_size: usize,
    pub lock: LockSettings,
    pub tombstone_ttl: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            lock: LockSettings::default(),
            tombstone_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Filesystem-backed coordinator.
pub struct CoordinatorService {
    root: PathBuf,
    block_size: usize,
    locks: PathLockManager,
    tombstones: TombstoneStore,
    tombstone_ttl: Millis,
}

impl CoordinatorService {
    pub fn new(root: impl Into<PathBuf>, settings: CoordinatorSettings) -> Self {
        let root = root.into();
        Self {
            locks: PathLockManager::new(root.clone(), settings.lock),
            tombstones: TombstoneStore::new(root.clone()),
            block_size: settings.block_size.max(1),
            tombstone_ttl: settings.tombstone_ttl.as_millis().min(Millis::MAX as u128) as Millis,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &PathLockManager {
        &self.locks
    }

    /// The unexpired tombstone for `path`, if any.
    fn live_tombstone(&self, path: &RelPath) -> Result<Option<Millis>, SyncError> {
        Ok(self
            .tombstones
            .read(path)?
            .filter(|t| !t.is_expired(now_millis(), self.tombstone_ttl))
            .map(|t| t.deleted_at))
    }
}

impl Coordinator for CoordinatorService {
    fn get_signature(&self, path: &RelPath) -> Result<Vec<u8>, SyncError> {
        // Best-effort snapshot: a writer may start right after the wait.
        self.locks.wait_until_free(path)?;
        let signature = signature_file(&path.to_native(&self.root), self.block_size)?;
        debug!(path = %path, blocks = signature.blocks.len(), "Served signature");
        Ok(signature.to_bytes()?)
    }

    fn get_delta(&self, path: &RelPath, signature: &[u8]) -> Result<Vec<u8>, SyncError> {
        let basis = Signature::from_bytes(signature)?;
        self.locks.wait_until_free(path)?;
        let delta = delta_file(&path.to_native(&self.root), &basis).map_err(|e| match e {
            SyncError::Io(io) if io.kind() == ErrorKind::NotFound => {
                SyncError::Remote(format!("{path} is not a live file"))
            }
            other => other,
        })?;
        debug!(
            path = %path,
            copied = delta.copied_blocks(),
            literal_bytes = delta.literal_len(),
            "Served delta"
        );
        Ok(delta.to_bytes()?)
    }

    fn apply_patch(&self, path: &RelPath, delta: &[u8], source_modified_at: Millis) -> Result<bool, SyncError> {
        let delta = Delta::from_bytes(delta)?;
        let _guard = self.locks.acquire(path)?;

        if let Some(deleted_at) = self.live_tombstone(path)? {
            if deleted_at >= source_modified_at {
                info!(
                    path = %path,
                    deleted_at,
                    source_modified_at,
                    "Refused patch older than deletion"
                );
                return Ok(false);
            }
        }

        match patch_file(&path.to_native(&self.root), &delta, Some(source_modified_at)) {
            Ok(()) => {
                self.tombstones.discard(path);
                info!(path = %path, size = delta.size, "Applied patch");
                Ok(true)
            }
            Err(SyncError::Patch { reason, .. }) => {
                warn!(path = %path, reason = %reason, "Patch did not verify");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn list_file_table(&self) -> Result<RemoteTable, SyncError> {
        let now = now_millis();
        self.tombstones.purge_expired(now, self.tombstone_ttl)?;

        let files = build_table(&self.root)?;
        let mut tombstones = std::collections::BTreeMap::new();
        for (path, tombstone) in self.tombstones.list()? {
            if files.contains(&path) {
                // The file was recreated directly in the root; the live copy wins.
                self.tombstones.discard(&path);
                continue;
            }
            tombstones.insert(path, tombstone.deleted_at);
        }
        debug!(files = files.len(), tombstones = tombstones.len(), "Listed file table");
        Ok(RemoteTable { files, tombstones })
    }

    fn delete_path(&self, path: &RelPath) -> Result<bool, SyncError> {
        let _guard = self.locks.acquire(path)?;
        let native = path.to_native(&self.root);
        match fs::symlink_metadata(&native) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        self.tombstones.write(path, now_millis())?;
        match fs::remove_file(&native) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(path = %path, "Deleted path");
        Ok(true)
    }
}
