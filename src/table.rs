//! File Metadata Table
//!
//! A [`FileTable`] is rebuilt from scratch by a full recursive scan every
//! cycle. Records are pure functions of the file's current content and
//! metadata; nothing is cached between scans.

use crate::error::SyncError;
use crate::paths::{is_control_artifact, tombstone_target, RelPath, TEMP_SUFFIX, TOMBSTONE_SUFFIX};
use crate::types::{to_millis, Checksum, Millis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Snapshot of one regular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: RelPath,
    pub size: u64,
    pub checksum: Checksum,
    pub modified_at: Millis,
    #[serde(default)]
    pub executable: bool,
}

impl FileRecord {
    /// Compute the record for `path` under `root`; `None` if it is not a regular file.
    pub fn read(root: &Path, path: &RelPath) -> Result<Option<Self>, SyncError> {
        let native = path.to_native(root);
        let metadata = match std::fs::symlink_metadata(&native) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        let checksum = match Checksum::from_file(&native) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(FileRecord {
            path: path.clone(),
            size: metadata.len(),
            checksum,
            modified_at: to_millis(metadata.modified()?),
            executable: is_executable(&metadata),
        }))
    }
}

#[cfg(unix)]
pub(crate) fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
pub(crate) fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Per-node snapshot: path -> record, iterated in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTable {
    entries: BTreeMap<RelPath, FileRecord>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.entries.insert(record.path.clone(), record);
    }

    pub fn get(&self, path: &RelPath) -> Option<&FileRecord> {
        self.entries.get(path)
    }

    pub fn remove(&mut self, path: &RelPath) -> Option<FileRecord> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &RelPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &RelPath> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.entries.values()
    }

    /// Path -> checksum view, the quantity two converged nodes agree on.
    pub fn checksums(&self) -> BTreeMap<RelPath, Checksum> {
        self.entries
            .iter()
            .map(|(path, record)| (path.clone(), record.checksum))
            .collect()
    }
}

/// Coordinator's answer to `list_file_table`: live files plus unexpired tombstones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTable {
    pub files: FileTable,
    #[serde(default)]
    pub tombstones: BTreeMap<RelPath, Millis>,
}

/// Scan `root` recursively and record every regular file.
///
/// Control artifacts (lock markers, tombstones, in-flight temp files) are
/// skipped, as are names that cannot be represented as a [`RelPath`].
pub fn build_table(root: &Path) -> Result<FileTable, SyncError> {
    let mut table = FileTable::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        // An unreadable directory fails the scan; skipping it would read as a mass deletion.
        let entry = entry.map_err(|e| {
            SyncError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_control_artifact(&name) {
            continue;
        }

        let path = match RelPath::from_native(root, entry.path()) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping unsyncable path");
                continue;
            }
        };

        // A file removed between the walk and the read simply drops out of this scan.
        match FileRecord::read(root, &path)? {
            Some(record) => table.insert(record),
            None => debug!(path = %path, "File vanished during scan"),
        }
    }

    Ok(table)
}

/// Every tombstone under `root`: content path -> raw tombstone file.
pub(crate) fn scan_tombstone_files(root: &Path) -> Result<Vec<(RelPath, std::path::PathBuf)>, SyncError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name().min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry while listing tombstones");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !(name.starts_with('.') && name.ends_with(TOMBSTONE_SUFFIX)) {
            continue;
        }
        if let Some(path) = tombstone_target(root, entry.path()) {
            found.push((path, entry.path().to_path_buf()));
        }
    }
    Ok(found)
}

/// Remove `.syncing` files abandoned by an interrupted patch.
///
/// Only files older than `max_age` are touched so an in-flight patch from a
/// concurrent handler keeps its output. Returns how many were removed.
pub fn sweep_stale_temp_files(root: &Path, max_age: Duration) -> usize {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in WalkDir::new(root).follow_links(false).min_depth(1).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !(name.starts_with('.') && name.ends_with(TEMP_SUFFIX)) {
            continue;
        }
        let stale = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .map(|age| age >= max_age)
            .unwrap_or(false);
        if !stale {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "Removed stale temp file");
                removed += 1;
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Could not remove stale temp file"),
        }
    }
    removed
}
