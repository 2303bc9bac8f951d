//! Configuration
//!
//! [`SyncConfig`] is assembled by [`ConfigLoader`] from layered sources, lowest
//! precedence first: built-in defaults, the global `config.toml`, an explicit
//! file, and `DRIFTSYNC__*` environment variables.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::client::ClientTimeouts;
use crate::concurrency::LockSettings;
use crate::coordinator::CoordinatorSettings;
use crate::error::SyncError;
use crate::logging::LoggingConfig;
use crate::protocol::Credential;
use crate::reconcile::EngineSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:9999";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory kept in sync; the command line may override it.
    pub root: Option<PathBuf>,
    pub credential: String,
    /// Address the coordinator binds.
    pub listen: String,
    /// Address a watching node connects to.
    pub coordinator: Option<String>,
    pub sync: SyncSection,
    pub lock: LockSection,
    pub tombstone_ttl_secs: u64,
    pub net: NetSection,
    /// Where a watching node keeps its seen index.
    pub state_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub interval_secs: u64,
    pub block_size: usize,
    pub temp_max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSection {
    pub attempts: u32,
    pub backoff_ms: u64,
    pub lease_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetSection {
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: None,
            credential: String::new(),
            listen: DEFAULT_LISTEN.to_string(),
            coordinator: None,
            sync: SyncSection::default(),
            lock: LockSection::default(),
            tombstone_ttl_secs: 24 * 60 * 60,
            net: NetSection::default(),
            state_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            block_size: crate::diff::DEFAULT_BLOCK_SIZE,
            temp_max_age_secs: 3600,
        }
    }
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff_ms: 200,
            lease_secs: 60,
        }
    }
}

impl Default for NetSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            io_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.credential.trim().is_empty() {
            return Err(SyncError::Config("credential must not be empty".into()));
        }
        if self.sync.block_size == 0 {
            return Err(SyncError::Config("sync.block_size must be positive".into()));
        }
        if self.sync.block_size > crate::diff::MAX_BLOCK_SIZE as usize {
            return Err(SyncError::Config(format!(
                "sync.block_size must not exceed {}",
                crate::diff::MAX_BLOCK_SIZE
            )));
        }
        if self.sync.interval_secs == 0 {
            return Err(SyncError::Config("sync.interval_secs must be positive".into()));
        }
        if self.lock.attempts == 0 {
            return Err(SyncError::Config("lock.attempts must be positive".into()));
        }
        Ok(())
    }

    /// The synced directory: `cli_root` if given, then `root`, then the current directory.
    pub fn resolve_root(&self, cli_root: Option<&Path>) -> PathBuf {
        cli_root
            .map(Path::to_path_buf)
            .or_else(|| self.root.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn credential(&self) -> Credential {
        Credential::new(self.credential.clone())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            attempts: self.lock.attempts,
            backoff: Duration::from_millis(self.lock.backoff_ms),
            lease: Duration::from_secs(self.lock.lease_secs),
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            block_size: self.sync.block_size,
            lock: self.lock_settings(),
            tombstone_ttl: Duration::from_secs(self.tombstone_ttl_secs),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            block_size: self.sync.block_size,
            temp_max_age: Duration::from_secs(self.sync.temp_max_age_secs),
        }
    }

    pub fn client_timeouts(&self) -> ClientTimeouts {
        ClientTimeouts {
            connect: Duration::from_millis(self.net.connect_timeout_ms),
            io: Duration::from_millis(self.net.io_timeout_ms),
        }
    }

    /// Seen-index directory for `root`: `state_dir` when configured, otherwise
    /// a per-root directory under the XDG data home.
    pub fn seen_index_dir(&self, root: &Path) -> Result<PathBuf, SyncError> {
        match &self.state_dir {
            Some(dir) => Ok(dir.join("seen")),
            None => Ok(paths::xdg_root::root_data_dir(root)?.join("seen")),
        }
    }
}
