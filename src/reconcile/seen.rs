//! Seen index: the paths that were live locally at the end of the previous
//! cycle. A path in the index but missing from the current scan was deleted
//! locally since then.

use crate::error::SyncError;
use crate::paths::RelPath;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

pub trait SeenIndex: Send + Sync {
    fn load(&self) -> Result<BTreeSet<RelPath>, SyncError>;
    fn store(&self, paths: &BTreeSet<RelPath>) -> Result<(), SyncError>;
}

/// In-memory index; forgets everything when the process exits.
#[derive(Debug, Default)]
pub struct MemorySeenIndex {
    paths: Mutex<BTreeSet<RelPath>>,
}

impl MemorySeenIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeenIndex for MemorySeenIndex {
    fn load(&self) -> Result<BTreeSet<RelPath>, SyncError> {
        Ok(self.paths.lock().clone())
    }

    fn store(&self, paths: &BTreeSet<RelPath>) -> Result<(), SyncError> {
        *self.paths.lock() = paths.clone();
        Ok(())
    }
}

/// Index persisted in a sled tree so local deletions made while the node was
/// stopped are still detected on restart.
pub struct SledSeenIndex {
    tree: sled::Tree,
}

impl SledSeenIndex {
    const TREE: &'static str = "seen_paths";

    pub fn open(dir: &Path) -> Result<Self, SyncError> {
        std::fs::create_dir_all(dir)?;
        let db = sled::open(dir)?;
        Ok(Self {
            tree: db.open_tree(Self::TREE)?,
        })
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, SyncError> {
        Ok(Self {
            tree: db.open_tree(Self::TREE)?,
        })
    }
}

impl SeenIndex for SledSeenIndex {
    fn load(&self) -> Result<BTreeSet<RelPath>, SyncError> {
        let mut paths = BTreeSet::new();
        for entry in self.tree.iter() {
            let (key, _) = entry?;
            let parsed = std::str::from_utf8(&key)
                .map_err(|e| SyncError::PathSafety(e.to_string()))
                .and_then(RelPath::parse);
            match parsed {
                Ok(path) => {
                    paths.insert(path);
                }
                Err(e) => warn!(error = %e, "Ignoring unreadable seen-index entry"),
            }
        }
        Ok(paths)
    }

    fn store(&self, paths: &BTreeSet<RelPath>) -> Result<(), SyncError> {
        let mut batch = sled::Batch::default();
        let mut removed = 0usize;
        for entry in self.tree.iter() {
            let (key, _) = entry?;
            let keep = std::str::from_utf8(&key)
                .ok()
                .and_then(|s| RelPath::parse(s).ok())
                .map(|p| paths.contains(&p))
                .unwrap_or(false);
            if !keep {
                batch.remove(key);
                removed += 1;
            }
        }
        for path in paths {
            batch.insert(path.as_str().as_bytes(), &[][..]);
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        debug!(stored = paths.len(), removed, "Seen index persisted");
        Ok(())
    }
}
