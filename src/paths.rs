//! Relative path keys and the control artifacts stored next to content files.
//!
//! A [`RelPath`] is the only way a path enters the engine: it is forward-slash
//! separated, NFC normalized, relative, and free of `.`/`..` segments. Anything
//! that fails [`RelPath::parse`] is rejected before touching the filesystem.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::{is_nfc, UnicodeNormalization};

/// Suffix of the per-path lock marker: `<path>.locked`.
pub const LOCK_SUFFIX: &str = ".locked";
/// Suffix of a tombstone: `<dir>/.<basename>.removed`.
pub const TOMBSTONE_SUFFIX: &str = ".removed";
/// Suffix of an in-flight patch output: `<dir>/.<basename>.<pid>.syncing`.
pub const TEMP_SUFFIX: &str = ".syncing";

/// Whether a file name belongs to the engine rather than to the synced tree.
pub fn is_control_artifact(file_name: &str) -> bool {
    file_name.ends_with(LOCK_SUFFIX)
        || (file_name.starts_with('.')
            && (file_name.ends_with(TOMBSTONE_SUFFIX) || file_name.ends_with(TEMP_SUFFIX)))
}

/// Validated relative path, the key of every table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// Validate and normalize a path received from a peer or the local scan.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let reject = || SyncError::PathSafety(raw.to_string());

        let unified = raw.replace('\\', "/");
        if unified.starts_with('/') || unified.contains('\0') {
            return Err(reject());
        }

        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(reject()),
                s => segments.push(s.nfc().collect::<String>()),
            }
        }

        let first_is_drive = segments
            .first()
            .map(|s| s.len() == 2 && s.ends_with(':'))
            .unwrap_or(false);
        if segments.is_empty() || first_is_drive {
            return Err(reject());
        }
        if segments.last().map(|s| is_control_artifact(s)).unwrap_or(false) {
            return Err(reject());
        }

        Ok(RelPath(segments.join("/")))
    }

    /// Build the key for a file found under `root` during a scan.
    pub fn from_native(root: &Path, path: &Path) -> Result<Self, SyncError> {
        let relative = path
            .strip_prefix(root)
            .map_err(|_| SyncError::PathSafety(path.display().to_string()))?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    let name = name
                        .to_str()
                        .ok_or_else(|| SyncError::PathSafety(path.display().to_string()))?;
                    // The key must name the same file on disk when mapped back.
                    if name.contains('\\') || !is_nfc(name) {
                        return Err(SyncError::PathSafety(path.display().to_string()));
                    }
                    segments.push(name);
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) | Component::ParentDir => {
                    return Err(SyncError::PathSafety(path.display().to_string()));
                }
            }
        }
        Self::parse(&segments.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Parent directory key, or `None` for entries at the root.
    pub fn parent(&self) -> Option<&str> {
        self.0.rfind('/').map(|idx| &self.0[..idx])
    }

    /// Location of the content file under `root`.
    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.0.split('/') {
            path.push(segment);
        }
        path
    }

    pub fn lock_marker(&self, root: &Path) -> PathBuf {
        self.sibling(root, &format!("{}{}", self.file_name(), LOCK_SUFFIX))
    }

    pub fn tombstone_path(&self, root: &Path) -> PathBuf {
        self.sibling(root, &format!(".{}{}", self.file_name(), TOMBSTONE_SUFFIX))
    }

    pub fn temp_path(&self, root: &Path) -> PathBuf {
        temp_sibling(&self.to_native(root))
    }

    fn sibling(&self, root: &Path, name: &str) -> PathBuf {
        let mut path = self.to_native(root);
        path.set_file_name(name);
        path
    }
}

/// Temporary sibling used for atomic replacement of `target`.
pub fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}{}", name, std::process::id(), TEMP_SUFFIX))
}

/// Recover the content path a tombstone file at `tombstone` stands for.
pub fn tombstone_target(root: &Path, tombstone: &Path) -> Option<RelPath> {
    let name = tombstone.file_name()?.to_str()?;
    let base = name.strip_prefix('.')?.strip_suffix(TOMBSTONE_SUFFIX)?;
    if base.is_empty() {
        return None;
    }
    RelPath::from_native(root, &tombstone.with_file_name(base)).ok()
}

impl TryFrom<String> for RelPath {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RelPath::parse(&value)
    }
}

impl From<RelPath> for String {
    fn from(path: RelPath) -> Self {
        path.0
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
