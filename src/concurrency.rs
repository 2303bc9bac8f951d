//! Per-path locking for patch application
//!
//! Writes (patch, delete) to one path are serialized; unrelated paths proceed
//! independently. A lock has two layers:
//!
//! - an in-process slot guarded by a mutex and condition variable, so request
//!   handlers in the same coordinator wait without spinning;
//! - an on-disk `<path>.locked` marker created with an atomic create-new, so
//!   other processes sharing the root observe the lock too. A marker older than
//!   the lease is treated as abandoned.
//!
//! Acquisition retries on a fixed backoff for a bounded number of attempts and
//! reports [`SyncError::LockTimeout`] when they run out. Release is best-effort.

use crate::error::SyncError;
use crate::paths::RelPath;
use crate::types::now_millis;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Retry policy for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    pub attempts: u32,
    pub backoff: Duration,
    /// Age after which an on-disk marker is considered abandoned.
    pub lease: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_millis(200),
            lease: Duration::from_secs(60),
        }
    }
}

/// Per-path lock manager for one coordinator root.
pub struct PathLockManager {
    root: PathBuf,
    settings: LockSettings,
    held: Mutex<HashSet<RelPath>>,
    released: Condvar,
}

/// Exclusive hold on one path; released on drop.
pub struct PathLockGuard<'a> {
    manager: &'a PathLockManager,
    path: RelPath,
}

enum Attempt {
    Acquired,
    HeldInProcess,
    HeldByMarker,
}

impl PathLockManager {
    pub fn new(root: impl Into<PathBuf>, settings: LockSettings) -> Self {
        Self {
            root: root.into(),
            settings,
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Acquire the lock for `path`, waiting up to `attempts` backoff intervals.
    pub fn acquire(&self, path: &RelPath) -> Result<PathLockGuard<'_>, SyncError> {
        for attempt in 1..=self.settings.attempts {
            match self.try_acquire(path)? {
                Attempt::Acquired => {
                    debug!(path = %path, attempt, "Lock acquired");
                    return Ok(PathLockGuard {
                        manager: self,
                        path: path.clone(),
                    });
                }
                Attempt::HeldInProcess => self.wait_for_release(path),
                Attempt::HeldByMarker => std::thread::sleep(self.settings.backoff),
            }
        }
        warn!(path = %path, attempts = self.settings.attempts, "Lock acquisition timed out");
        Err(self.timeout(path))
    }

    /// Wait until nobody holds `path`, without taking the lock.
    ///
    /// Readers use this to avoid serving a half-applied write; the read that
    /// follows is still lock-free and may race a writer that starts right after.
    pub fn wait_until_free(&self, path: &RelPath) -> Result<(), SyncError> {
        for _ in 0..self.settings.attempts {
            if self.held.lock().contains(path) {
                self.wait_for_release(path);
                continue;
            }
            if self.live_marker_exists(path) {
                std::thread::sleep(self.settings.backoff);
                continue;
            }
            return Ok(());
        }
        Err(self.timeout(path))
    }

    pub fn is_locked(&self, path: &RelPath) -> bool {
        self.held.lock().contains(path) || self.live_marker_exists(path)
    }

    fn try_acquire(&self, path: &RelPath) -> Result<Attempt, SyncError> {
        // Reserve the in-process slot first so the marker is only touched by one handler.
        {
            let mut held = self.held.lock();
            if held.contains(path) {
                return Ok(Attempt::HeldInProcess);
            }
            held.insert(path.clone());
        }

        match self.create_marker(path) {
            Ok(()) => Ok(Attempt::Acquired),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let reaped = self.reap_stale_marker(path);
                self.release_slot(path);
                if reaped {
                    self.try_acquire(path)
                } else {
                    Ok(Attempt::HeldByMarker)
                }
            }
            Err(e) => {
                self.release_slot(path);
                Err(e.into())
            }
        }
    }

    fn wait_for_release(&self, path: &RelPath) {
        let mut held = self.held.lock();
        if held.contains(path) {
            let _ = self.released.wait_for(&mut held, self.settings.backoff);
        }
    }

    fn create_marker(&self, path: &RelPath) -> std::io::Result<()> {
        let marker = path.lock_marker(&self.root);
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(&marker)?;
        writeln!(file, "{} {}", std::process::id(), now_millis())?;
        Ok(())
    }

    fn marker_age(&self, path: &RelPath) -> Option<Duration> {
        let modified = fs::metadata(path.lock_marker(&self.root)).ok()?.modified().ok()?;
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }

    fn live_marker_exists(&self, path: &RelPath) -> bool {
        matches!(self.marker_age(path), Some(age) if age < self.settings.lease)
    }

    /// Remove a marker whose lease ran out; `true` if one was removed.
    fn reap_stale_marker(&self, path: &RelPath) -> bool {
        match self.marker_age(path) {
            Some(age) if age >= self.settings.lease => {
                warn!(path = %path, age_secs = age.as_secs(), "Removing abandoned lock marker");
                fs::remove_file(path.lock_marker(&self.root)).is_ok()
            }
            _ => false,
        }
    }

    fn release_slot(&self, path: &RelPath) {
        self.held.lock().remove(path);
        self.released.notify_all();
    }

    fn timeout(&self, path: &RelPath) -> SyncError {
        SyncError::LockTimeout {
            path: path.to_string(),
            attempts: self.settings.attempts,
        }
    }
}

impl PathLockGuard<'_> {
    pub fn path(&self) -> &RelPath {
        &self.path
    }
}

impl Drop for PathLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(self.path.lock_marker(&self.manager.root)) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path, error = %e, "Could not remove lock marker");
            }
        }
        self.manager.release_slot(&self.path);
        debug!(path = %self.path, "Lock released");
    }
}
