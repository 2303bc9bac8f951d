//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::SyncConfig;
use crate::error::SyncError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the global file and environment, with an optional explicit
    /// file layered between them. The result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<SyncConfig, SyncError> {
        let config = MergeService::load(explicit)?;
        config.validate()?;
        Ok(config)
    }

    /// Load without validation, for commands that never talk to a peer.
    pub fn load_unvalidated(explicit: Option<&Path>) -> Result<SyncConfig, SyncError> {
        Ok(MergeService::load(explicit)?)
    }

    /// Load from one file plus environment, ignoring the global file.
    pub fn load_from_file(path: &Path) -> Result<SyncConfig, SyncError> {
        let config = MergeService::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default() -> SyncConfig {
        SyncConfig::default()
    }
}
