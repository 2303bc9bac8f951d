//! Reconciliation Engine
//!
//! The watching node's loop. Every cycle it scans the local root, fetches the
//! coordinator's table, plans one decision per path and executes the plan one
//! path at a time. A failure on one path is logged and counted; the cycle
//! moves on to the next path and the failed one is retried next cycle.

mod plan;
mod seen;

pub use plan::{plan, Action, PlannedAction};
pub use seen::{MemorySeenIndex, SeenIndex, SledSeenIndex};

use crate::coordinator::Coordinator;
use crate::diff::{delta_file, patch_file, signature_file, Delta, Signature, DEFAULT_BLOCK_SIZE};
use crate::error::SyncError;
use crate::paths::RelPath;
use crate::table::{build_table, sweep_stale_temp_files, FileTable, RemoteTable};
use crate::tombstone::TombstoneStore;
use crate::types::{now_millis, to_millis, Millis};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub block_size: usize,
    /// Temp files older than this are leftovers of a crashed patch.
    pub temp_max_age: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            temp_max_age: Duration::from_secs(3600),
        }
    }
}

/// One path that could not be synced this cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PathFailure {
    pub path: RelPath,
    pub action: Action,
    pub error: String,
    pub retryable: bool,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_local: usize,
    pub deleted_remote: usize,
    pub tombstones_collected: usize,
    pub tombstones_created: usize,
    pub skipped: usize,
    pub failures: Vec<PathFailure>,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Number of content transfers and deletions performed.
    pub fn changes(&self) -> usize {
        self.uploaded + self.downloaded + self.deleted_local + self.deleted_remote
    }

    fn record(&mut self, action: Action) {
        match action {
            Action::Skip => self.skipped += 1,
            Action::Upload => self.uploaded += 1,
            Action::Download => self.downloaded += 1,
            Action::DeleteLocal => self.deleted_local += 1,
            Action::DeleteRemote => self.deleted_remote += 1,
            Action::CollectTombstone => self.tombstones_collected += 1,
        }
    }
}

/// Everything a cycle observes before acting.
#[derive(Debug, Clone)]
pub struct Observation {
    pub local: FileTable,
    pub remote: RemoteTable,
    pub tombstones: BTreeMap<RelPath, Millis>,
    /// Paths found deleted locally since the previous cycle.
    pub new_deletions: Vec<RelPath>,
}

pub struct ReconciliationEngine<C: Coordinator> {
    root: PathBuf,
    coordinator: C,
    seen: Box<dyn SeenIndex>,
    tombstones: TombstoneStore,
    settings: EngineSettings,
    running: Arc<RwLock<bool>>,
}

impl<C: Coordinator> ReconciliationEngine<C> {
    pub fn new(root: impl Into<PathBuf>, coordinator: C, seen: Box<dyn SeenIndex>, settings: EngineSettings) -> Self {
        let root = root.into();
        Self {
            tombstones: TombstoneStore::new(root.clone()),
            root,
            coordinator,
            seen,
            settings,
            running: Arc::new(RwLock::new(true)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    /// Scan both sides. With `commit`, fresh local deletions are recorded as
    /// tombstones on disk; without it they only appear in the returned map.
    pub fn observe(&self, commit: bool) -> Result<Observation, SyncError> {
        if commit {
            let swept = sweep_stale_temp_files(&self.root, self.settings.temp_max_age);
            if swept > 0 {
                info!(count = swept, "Removed abandoned temp files");
            }
        }

        let mut tombstones: BTreeMap<RelPath, Millis> = self
            .tombstones
            .list()?
            .into_iter()
            .map(|(path, t)| (path, t.deleted_at))
            .collect();
        let seen = self.seen.load()?;
        let local = build_table(&self.root)?;

        let now = now_millis();
        let new_deletions: Vec<RelPath> = seen
            .into_iter()
            .filter(|p| !local.contains(p) && !tombstones.contains_key(p))
            .collect();
        // Stamp every deletion before any tombstone write touches a directory.
        let stamped: Vec<Millis> = new_deletions.iter().map(|p| self.deletion_time(p, now)).collect();
        for (path, deleted_at) in new_deletions.iter().zip(stamped) {
            if commit {
                self.tombstones.write(path, deleted_at)?;
            }
            info!(path = %path, deleted_at, "Detected local deletion");
            tombstones.insert(path.clone(), deleted_at);
        }

        let remote = self.coordinator.list_file_table()?;
        debug!(
            local = local.len(),
            remote = remote.files.len(),
            local_tombstones = tombstones.len(),
            remote_tombstones = remote.tombstones.len(),
            "Observed both sides"
        );

        Ok(Observation {
            local,
            remote,
            tombstones,
            new_deletions,
        })
    }

    /// The decisions the next cycle would make, without acting on them.
    pub fn dry_run(&self) -> Result<Vec<PlannedAction>, SyncError> {
        let observed = self.observe(false)?;
        Ok(plan(&observed.local, &observed.remote, &observed.tombstones))
    }

    /// Run one full cycle.
    ///
    /// Fails as a whole only when the local scan or the coordinator's table
    /// cannot be obtained; everything after that is per path.
    pub fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let started = Instant::now();
        let observed = self.observe(true)?;
        let mut report = CycleReport {
            tombstones_created: observed.new_deletions.len(),
            ..CycleReport::default()
        };

        let mut live: BTreeSet<RelPath> = observed.local.paths().cloned().collect();
        let mut failed_paths: BTreeSet<RelPath> = BTreeSet::new();

        for planned in plan(&observed.local, &observed.remote, &observed.tombstones) {
            // A path whose first step failed is left alone until the next cycle.
            if failed_paths.contains(&planned.path) {
                continue;
            }
            debug!(path = %planned.path, action = %planned.action, reason = planned.reason, "Decision");
            match self.execute(&planned, &observed.remote) {
                Ok(()) => {
                    match planned.action {
                        Action::Download => {
                            live.insert(planned.path.clone());
                        }
                        Action::DeleteLocal => {
                            live.remove(&planned.path);
                        }
                        _ => {}
                    }
                    report.record(planned.action);
                }
                Err(e) => {
                    if matches!(e, SyncError::Auth) {
                        error!(path = %planned.path, action = %planned.action, "Coordinator rejected credential");
                    } else {
                        warn!(path = %planned.path, action = %planned.action, error = %e, "Path failed this cycle");
                    }
                    failed_paths.insert(planned.path.clone());
                    report.failures.push(PathFailure {
                        path: planned.path.clone(),
                        action: planned.action,
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.seen.store(&live)?;
        info!(
            uploaded = report.uploaded,
            downloaded = report.downloaded,
            deleted_local = report.deleted_local,
            deleted_remote = report.deleted_remote,
            skipped = report.skipped,
            failed = report.failed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Handle used to stop [`run`](Self::run) from another thread.
    pub fn stop_handle(&self) -> Arc<RwLock<bool>> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        *self.running.write() = false;
    }

    /// Cycle every `interval` until stopped. A failed cycle is logged and
    /// retried at the next tick. Returns at once if already stopped.
    pub fn run(&self, interval: Duration) {
        info!(root = %self.root.display(), interval_secs = interval.as_secs(), "Reconciliation loop started");

        while *self.running.read() {
            if let Err(e) = self.run_cycle() {
                error!(error = %e, "Cycle failed");
            }

            let deadline = Instant::now() + interval;
            while *self.running.read() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(100).min(interval));
            }
        }
        info!("Reconciliation loop stopped");
    }

    /// Latest moment `path` can have been removed.
    ///
    /// Removing an entry updates its directory's mtime, so the nearest
    /// ancestor still present under the root bounds the deletion from above.
    /// Falls back to `now` when no ancestor can be read.
    fn deletion_time(&self, path: &RelPath, now: Millis) -> Millis {
        path.to_native(&self.root)
            .ancestors()
            .skip(1)
            .take_while(|dir| dir.starts_with(&self.root))
            .find_map(|dir| fs::metadata(dir).and_then(|m| m.modified()).ok())
            .map(|modified| to_millis(modified).min(now))
            .unwrap_or(now)
    }

    fn execute(&self, planned: &PlannedAction, remote: &RemoteTable) -> Result<(), SyncError> {
        let path = &planned.path;
        match planned.action {
            Action::Skip => Ok(()),
            Action::Upload => self.upload(path),
            Action::Download => {
                let fallback = remote.files.get(path).map(|r| r.modified_at);
                self.download(path, fallback)
            }
            Action::DeleteLocal => self.delete_local(path),
            Action::DeleteRemote => {
                if !self.coordinator.delete_path(path)? {
                    debug!(path = %path, "Coordinator had nothing live to delete");
                }
                info!(path = %path, "Deleted on coordinator");
                Ok(())
            }
            Action::CollectTombstone => {
                self.tombstones.remove(path)?;
                debug!(path = %path, "Collected local tombstone");
                Ok(())
            }
        }
    }

    fn upload(&self, path: &RelPath) -> Result<(), SyncError> {
        let native = path.to_native(&self.root);
        let basis = Signature::from_bytes(&self.coordinator.get_signature(path)?)?;
        let delta = delta_file(&native, &basis)?;
        let modified_at = match delta.modified_at {
            Some(millis) => millis,
            None => now_millis(),
        };

        if !self.coordinator.apply_patch(path, &delta.to_bytes()?, modified_at)? {
            return Err(SyncError::patch(path, "coordinator refused or could not verify the patch"));
        }
        info!(
            path = %path,
            size = delta.size,
            literal_bytes = delta.literal_len(),
            "Uploaded"
        );
        Ok(())
    }

    fn download(&self, path: &RelPath, remote_modified_at: Option<Millis>) -> Result<(), SyncError> {
        let native = path.to_native(&self.root);
        let basis = signature_file(&native, self.settings.block_size)?;
        let delta = Delta::from_bytes(&self.coordinator.get_delta(path, &basis.to_bytes()?)?)?;

        // Stamp with the coordinator's mtime so the next comparison sees equal timestamps.
        patch_file(&native, &delta, delta.modified_at.or(remote_modified_at))?;
        self.tombstones.discard(path);
        info!(
            path = %path,
            size = delta.size,
            literal_bytes = delta.literal_len(),
            "Downloaded"
        );
        Ok(())
    }

    fn delete_local(&self, path: &RelPath) -> Result<(), SyncError> {
        match fs::remove_file(path.to_native(&self.root)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(path = %path, "Deleted local copy");
        Ok(())
    }
}
