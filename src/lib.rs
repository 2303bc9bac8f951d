//! driftsync: polling directory reconciliation
//!
//! Keeps replicas of a directory tree eventually consistent between one
//! coordinator and any number of watching nodes. Each node periodically scans
//! its tree, compares content checksums against the coordinator's table,
//! resolves conflicts by last writer wins, and moves content with rsync-style
//! deltas. Deletions travel as tombstones; writes on the coordinator are
//! serialized per path.

pub mod client;
pub mod concurrency;
pub mod config;
pub mod coordinator;
pub mod diff;
pub mod error;
pub mod logging;
pub mod paths;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod table;
pub mod tombstone;
pub mod tooling;
pub mod types;

pub use coordinator::{Coordinator, CoordinatorService, CoordinatorSettings};
pub use error::SyncError;
pub use paths::RelPath;
pub use reconcile::{CycleReport, ReconciliationEngine};
pub use table::{build_table, FileRecord, FileTable, RemoteTable};
