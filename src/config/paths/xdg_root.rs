//! XDG Base Directory utilities for per-root node state.

use crate::error::SyncError;
use std::path::{Component, Path, PathBuf};

const APP_DIR: &str = "driftsync";

/// `$XDG_DATA_HOME`, falling back to `$HOME/.local/share`.
pub fn data_home() -> Option<PathBuf> {
    if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data_home.is_empty() {
            return Some(PathBuf::from(xdg_data_home));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("share"))
}

/// `$XDG_CONFIG_HOME`, falling back to `$HOME/.config`.
pub fn config_home() -> Option<PathBuf> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config_home.is_empty() {
            return Some(PathBuf::from(xdg_config_home));
        }
    }
    std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".config"))
}

/// `$XDG_CONFIG_HOME/driftsync/config.toml`
pub fn global_config_path() -> Option<PathBuf> {
    config_home().map(|home| home.join(APP_DIR).join("config.toml"))
}

/// State directory for one synced root.
///
/// The canonical root path is mirrored below `$XDG_DATA_HOME/driftsync/`, so
/// `/home/user/shared` maps to `$XDG_DATA_HOME/driftsync/home/user/shared/`
/// and nothing is written inside the synced tree itself.
pub fn root_data_dir(root: &Path) -> Result<PathBuf, SyncError> {
    let data_home = data_home().ok_or_else(|| {
        SyncError::Config("Could not determine XDG data home directory (HOME not set)".to_string())
    })?;
    let canonical = dunce::canonicalize(root)
        .map_err(|e| SyncError::Config(format!("Failed to canonicalize root {}: {}", root.display(), e)))?;
    Ok(mirror_under(&data_home.join(APP_DIR), &canonical))
}

fn mirror_under(base: &Path, canonical: &Path) -> PathBuf {
    let mut dir = base.to_path_buf();
    for component in canonical.components() {
        match component {
            Component::Normal(name) => dir.push(name),
            Component::Prefix(prefix) => {
                // Keep drive letters apart: C:\x and D:\x must not share state.
                let drive: String = prefix
                    .as_os_str()
                    .to_string_lossy()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect();
                dir.push(drive);
            }
            Component::RootDir | Component::CurDir | Component::ParentDir => {}
        }
    }
    dir
}
