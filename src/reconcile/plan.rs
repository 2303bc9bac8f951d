//! Per-path sync decisions
//!
//! [`plan`] is a pure function of the local table, the coordinator's table and
//! the local tombstones. It never touches the filesystem or the network, so the
//! same decisions drive a real cycle and a dry run.

use crate::paths::RelPath;
use crate::table::{FileRecord, FileTable, RemoteTable};
use crate::types::Millis;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Both sides hold identical content.
    Skip,
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    /// Remove a local tombstone that has served its purpose.
    CollectTombstone,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Skip => "skip",
            Action::Upload => "upload",
            Action::Download => "download",
            Action::DeleteLocal => "delete-local",
            Action::DeleteRemote => "delete-remote",
            Action::CollectTombstone => "collect-tombstone",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAction {
    pub path: RelPath,
    pub action: Action,
    pub reason: &'static str,
}

/// Decide what to do with every path known to either side.
///
/// A path may get two entries: a tombstone collection followed by the content
/// decision, when a local tombstone turned out to be older than the content it
/// was meant to delete.
pub fn plan(
    local: &FileTable,
    remote: &RemoteTable,
    local_tombstones: &BTreeMap<RelPath, Millis>,
) -> Vec<PlannedAction> {
    let paths: BTreeSet<&RelPath> = local
        .paths()
        .chain(remote.files.paths())
        .chain(local_tombstones.keys())
        .collect();

    let mut actions = Vec::new();
    for path in paths {
        decide(
            path,
            local.get(path),
            remote.files.get(path),
            local_tombstones.get(path).copied(),
            remote.tombstones.get(path).copied(),
            &mut actions,
        );
    }
    actions
}

fn decide(
    path: &RelPath,
    local: Option<&FileRecord>,
    remote: Option<&FileRecord>,
    local_tombstone: Option<Millis>,
    remote_tombstone: Option<Millis>,
    out: &mut Vec<PlannedAction>,
) {
    let mut push = |action: Action, reason: &'static str| {
        out.push(PlannedAction {
            path: path.clone(),
            action,
            reason,
        })
    };

    // A local deletion wins over every copy it is at least as new as.
    if let Some(deleted_at) = local_tombstone {
        let newest_copy = local
            .map(|l| l.modified_at)
            .into_iter()
            .chain(remote.map(|r| r.modified_at))
            .max();
        match newest_copy {
            None => {
                push(Action::CollectTombstone, "deleted on both sides");
                return;
            }
            Some(newest) if deleted_at >= newest => {
                if local.is_some() {
                    push(Action::DeleteLocal, "local deletion is newer than the local copy");
                }
                if remote.is_some() {
                    push(Action::DeleteRemote, "local deletion is newer than the coordinator copy");
                }
                return;
            }
            Some(_) => push(Action::CollectTombstone, "file rewritten after local deletion"),
        }
    }

    match (local, remote) {
        (Some(l), None) => match remote_tombstone {
            Some(deleted_at) if deleted_at >= l.modified_at => {
                push(Action::DeleteLocal, "deleted on coordinator")
            }
            Some(_) => push(Action::Upload, "edited locally after coordinator deletion"),
            None => push(Action::Upload, "new local file"),
        },
        (None, Some(_)) => push(Action::Download, "new on coordinator"),
        (Some(l), Some(r)) => {
            let (action, reason) = compare(l, r);
            push(action, reason)
        }
        (None, None) => {}
    }
}

/// Last-writer-wins between two live copies.
fn compare(local: &FileRecord, remote: &FileRecord) -> (Action, &'static str) {
    if local.checksum == remote.checksum {
        return (Action::Skip, "identical content");
    }
    match local.modified_at.cmp(&remote.modified_at) {
        Ordering::Greater => (Action::Upload, "local copy is newer"),
        Ordering::Less => (Action::Download, "coordinator copy is newer"),
        // Equal timestamps: every node picks the greater checksum, so all converge on one copy.
        Ordering::Equal if local.checksum > remote.checksum => {
            (Action::Upload, "same timestamp, local checksum wins")
        }
        Ordering::Equal => (Action::Download, "same timestamp, coordinator checksum wins"),
    }
}
