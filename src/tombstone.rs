//! Tombstone Records
//!
//! A tombstone marks a deleted path so that a peer still holding an older copy
//! learns about the deletion instead of silently recreating the file. It lives
//! next to where the file used to be, as `<dir>/.<basename>.removed`, and its
//! body is the deletion time in milliseconds.

use crate::error::SyncError;
use crate::paths::RelPath;
use crate::table::scan_tombstone_files;
use crate::types::{to_millis, Millis};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    pub deleted_at: Millis,
}

impl Tombstone {
    pub fn is_expired(&self, now: Millis, ttl_millis: Millis) -> bool {
        now.saturating_sub(self.deleted_at) > ttl_millis
    }
}

/// Tombstones stored under one root.
#[derive(Debug, Clone)]
pub struct TombstoneStore {
    root: PathBuf,
}

impl TombstoneStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, path: &RelPath, deleted_at: Millis) -> Result<(), SyncError> {
        let marker = path.tombstone_path(&self.root);
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&marker, deleted_at.to_string())?;
        debug!(path = %path, deleted_at, "Tombstone written");
        Ok(())
    }

    pub fn read(&self, path: &RelPath) -> Result<Option<Tombstone>, SyncError> {
        read_marker(&path.tombstone_path(&self.root))
    }

    /// Remove the tombstone for `path`; `false` if there was none.
    pub fn remove(&self, path: &RelPath) -> Result<bool, SyncError> {
        match fs::remove_file(path.tombstone_path(&self.root)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal: failure is logged, never propagated.
    pub fn discard(&self, path: &RelPath) {
        if let Err(e) = self.remove(path) {
            warn!(path = %path, error = %e, "Could not remove tombstone");
        }
    }

    /// Every tombstone under the root.
    pub fn list(&self) -> Result<BTreeMap<RelPath, Tombstone>, SyncError> {
        let mut found = BTreeMap::new();
        for (path, marker) in scan_tombstone_files(&self.root)? {
            if let Some(tombstone) = read_marker(&marker)? {
                found.insert(path, tombstone);
            }
        }
        Ok(found)
    }

    /// Remove tombstones older than `ttl_millis`; returns the paths purged.
    pub fn purge_expired(&self, now: Millis, ttl_millis: Millis) -> Result<Vec<RelPath>, SyncError> {
        let mut purged = Vec::new();
        for (path, tombstone) in self.list()? {
            if tombstone.is_expired(now, ttl_millis) {
                self.discard(&path);
                purged.push(path);
            }
        }
        if !purged.is_empty() {
            debug!(count = purged.len(), "Purged expired tombstones");
        }
        Ok(purged)
    }
}

fn read_marker(marker: &Path) -> Result<Option<Tombstone>, SyncError> {
    let body = match fs::read_to_string(marker) {
        Ok(body) => body,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let deleted_at = match body.trim().parse::<Millis>() {
        Ok(millis) => millis,
        // A torn write leaves an unparsable body; the marker's own mtime is close enough.
        Err(_) => to_millis(fs::metadata(marker)?.modified()?),
    };
    Ok(Some(Tombstone { deleted_at }))
}
