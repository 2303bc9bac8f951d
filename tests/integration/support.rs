//! Shared fixtures: an in-process coordinator and watching nodes on temp dirs.

use driftsync::concurrency::LockSettings;
use driftsync::coordinator::{CoordinatorService, CoordinatorSettings};
use driftsync::reconcile::{EngineSettings, MemorySeenIndex, ReconciliationEngine};
use driftsync::types::{from_millis, now_millis, to_millis, Millis};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub type Engine = ReconciliationEngine<Arc<CoordinatorService>>;

pub struct Node {
    pub dir: TempDir,
    pub engine: Engine,
}

impl Node {
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.path(rel)).ok()
    }

    pub fn write(&self, rel: &str, content: &str, modified_at: Millis) {
        write_with_mtime(&self.path(rel), content, modified_at);
    }
}

pub struct Cluster {
    pub coordinator_dir: TempDir,
    pub coordinator: Arc<CoordinatorService>,
    pub nodes: Vec<Node>,
}

pub fn fast_locks() -> LockSettings {
    LockSettings {
        attempts: 3,
        backoff: Duration::from_millis(5),
        lease: Duration::from_secs(60),
    }
}

impl Cluster {
    pub fn new(nodes: usize) -> Self {
        Self::with_settings(
            nodes,
            CoordinatorSettings {
                block_size: 64,
                lock: fast_locks(),
                tombstone_ttl: Duration::from_secs(3600),
            },
        )
    }

    pub fn with_settings(nodes: usize, settings: CoordinatorSettings) -> Self {
        let coordinator_dir = TempDir::new().unwrap();
        let coordinator = Arc::new(CoordinatorService::new(coordinator_dir.path(), settings));
        let nodes = (0..nodes)
            .map(|_| {
                let dir = TempDir::new().unwrap();
                let engine = ReconciliationEngine::new(
                    dir.path(),
                    coordinator.clone(),
                    Box::new(MemorySeenIndex::new()),
                    EngineSettings {
                        block_size: 64,
                        temp_max_age: Duration::from_secs(3600),
                    },
                );
                Node { dir, engine }
            })
            .collect();
        Self {
            coordinator_dir,
            coordinator,
            nodes,
        }
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn coordinator_path(&self, rel: &str) -> PathBuf {
        self.coordinator_dir.path().join(rel)
    }

    /// One cycle on every node, in order; panics on a whole-cycle failure.
    pub fn round(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.engine.run_cycle().unwrap().changes())
            .sum()
    }
}

pub fn write_with_mtime(path: &Path, content: &str, modified_at: Millis) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(from_millis(modified_at)).unwrap();
}

pub fn mtime(path: &Path) -> Millis {
    to_millis(fs::metadata(path).unwrap().modified().unwrap())
}

/// A timestamp `secs` seconds in the past, whole seconds so every filesystem keeps it exactly.
pub fn secs_ago(secs: i64) -> Millis {
    (now_millis() / 1000 - secs) * 1000
}

/// Every tombstone file under `root`.
pub fn tombstone_files(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".removed"))
        .map(|e| e.path().to_path_buf())
        .collect()
}
