//! Error types for the reconciliation protocol.
//!
//! Every failure a node can observe maps onto one [`SyncError`] variant. The
//! reconciliation loop uses [`SyncError::is_retryable`] to decide whether a
//! per-path failure is simply retried next cycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the sync engine, the coordinator and the transport.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Coordinator unreachable, connection dropped, or socket timeout.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Credential did not match the coordinator's.
    #[error("authentication failed")]
    Auth,

    /// The per-path lock stayed held for every attempt.
    #[error("lock on {path} still held after {attempts} attempts")]
    LockTimeout { path: String, attempts: u32 },

    /// Signature and delta did not reproduce the expected content.
    #[error("patch of {path} failed: {reason}")]
    Patch { path: String, reason: String },

    /// A path escaped the root, was absolute, or named a control artifact.
    #[error("unsafe path rejected: {0:?}")]
    PathSafety(String),

    /// Malformed frame or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Coordinator-side failure without a more specific kind.
    #[error("coordinator error: {0}")]
    Remote(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the failure is expected to clear up on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::LockTimeout { .. } | SyncError::Patch { .. }
        )
    }

    pub(crate) fn patch(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        SyncError::Patch {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for SyncError {
    fn from(err: bincode::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}

/// Error as carried in a response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireError {
    Auth,
    LockTimeout { path: String, attempts: u32 },
    Patch { path: String, reason: String },
    PathSafety(String),
    Protocol(String),
    Internal(String),
}

impl From<&SyncError> for WireError {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::Auth => WireError::Auth,
            SyncError::LockTimeout { path, attempts } => WireError::LockTimeout {
                path: path.clone(),
                attempts: *attempts,
            },
            SyncError::Patch { path, reason } => WireError::Patch {
                path: path.clone(),
                reason: reason.clone(),
            },
            SyncError::PathSafety(path) => WireError::PathSafety(path.clone()),
            SyncError::Protocol(msg) => WireError::Protocol(msg.clone()),
            other => WireError::Internal(other.to_string()),
        }
    }
}

impl From<WireError> for SyncError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Auth => SyncError::Auth,
            WireError::LockTimeout { path, attempts } => SyncError::LockTimeout { path, attempts },
            WireError::Patch { path, reason } => SyncError::Patch { path, reason },
            WireError::PathSafety(path) => SyncError::PathSafety(path),
            WireError::Protocol(msg) => SyncError::Protocol(msg),
            WireError::Internal(msg) => SyncError::Remote(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(SyncError::Transport("reset".into()).is_retryable());
        assert!(SyncError::LockTimeout {
            path: "a".into(),
            attempts: 3
        }
        .is_retryable());
        assert!(SyncError::patch("a", "checksum mismatch").is_retryable());
        assert!(!SyncError::Auth.is_retryable());
        assert!(!SyncError::PathSafety("../x".into()).is_retryable());
    }

    #[test]
    fn test_wire_error_preserves_lock_timeout() {
        let err = SyncError::LockTimeout {
            path: "docs/a.txt".into(),
            attempts: 7,
        };
        let wire = WireError::from(&err);
        match SyncError::from(wire) {
            SyncError::LockTimeout { path, attempts } => {
                assert_eq!(path, "docs/a.txt");
                assert_eq!(attempts, 7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_io_error_becomes_internal_on_the_wire() {
        let err = SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(matches!(WireError::from(&err), WireError::Internal(msg) if msg.contains("disk full")));
    }
}
